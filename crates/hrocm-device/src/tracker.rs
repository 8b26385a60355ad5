//! Scan task tracking.
//!
//! A trigger runs the power pipeline and, when an OSNR plan is loaded,
//! the OSNR pipeline. Both finish independently; each reports completion
//! by copying the trigger's sequence number into its `SEQARR` slot.

use std::fmt;

use hrocm_wire::frame::{Header, Pipeline};

/// Progress of the last triggered scan, as seen by one header poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// No scan has been started, or its results were already read.
    Idle,
    /// At least one triggered pipeline has not finished.
    Pending,
    /// Every triggered pipeline has finished.
    Finished,
    /// The header could not be read, so progress is unknown.
    Indeterminate,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Pending => "pending",
            ScanStatus::Finished => "finished",
            ScanStatus::Indeterminate => "indeterminate",
        };
        f.write_str(name)
    }
}

/// Sequence numbers of the last trigger, per pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTracker {
    power: u32,
    osnr: u32,
    mask: u32,
    valid: bool,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a trigger with `sequence` covering the pipelines in `mask`.
    pub fn record_trigger(&mut self, sequence: u32, mask: u32) {
        self.power = sequence;
        self.osnr = sequence;
        self.mask = mask;
        self.valid = true;
    }

    /// Forget the in-flight scan. Called when the plan changes or the
    /// results have been read.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Returns `true` while a started scan has not been read.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Task mask of the last trigger.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Tracked sequence number of `pipeline`, if it takes part in scans.
    pub fn sequence(&self, pipeline: Pipeline) -> Option<u32> {
        match pipeline {
            Pipeline::Power => Some(self.power),
            Pipeline::Osnr => Some(self.osnr),
            _ => None,
        }
    }

    /// Pipelines the last trigger started, power first.
    pub fn triggered(&self) -> impl Iterator<Item = (Pipeline, u32)> + '_ {
        [Pipeline::Power, Pipeline::Osnr]
            .into_iter()
            .filter(|p| p.in_mask(self.mask))
            .filter_map(|p| self.sequence(p).map(|seq| (p, seq)))
    }

    /// Judge progress from one freshly polled header.
    pub fn status(&self, header: &Header) -> ScanStatus {
        if !self.valid {
            return ScanStatus::Idle;
        }
        if header.sequence != self.power && header.sequence != self.osnr {
            return ScanStatus::Pending;
        }
        if header.is_pending() {
            return ScanStatus::Pending;
        }
        if self
            .triggered()
            .any(|(pipeline, seq)| header.completed(pipeline) != seq)
        {
            return ScanStatus::Pending;
        }
        ScanStatus::Finished
    }
}
