//! Session diagnostics and link counters.
//!
//! [`Diagnostics`] is the ordered log of human-readable failure detail a
//! device session accumulates. Each entry is tagged with a [`Severity`] and
//! the source location that recorded it. The caller drains the log
//! explicitly; nothing is kept in global state.
//!
//! Every entry is also emitted as a `tracing` event, so applications that
//! install a subscriber see the same detail without draining.
//!
//! # Example
//!
//! ```
//! use hrocm_core::Diagnostics;
//!
//! let mut diag = Diagnostics::new();
//! diag.warning("CRC1 failed - retrying");
//! diag.error("Timeout");
//! let text = diag.drain();
//! assert!(text.starts_with("[WARNING] CRC1 failed - retrying"));
//! assert!(diag.is_empty());
//! ```

use std::fmt;
use std::panic::Location;

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// One recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub severity: Severity,
    pub message: String,
    pub location: &'static Location<'static>,
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self
            .location
            .file()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        write!(
            f,
            "[{}] {} ({}, line {})",
            self.severity,
            self.message,
            file,
            self.location.line()
        )
    }
}

/// Ordered, drainable log of errors and warnings.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<DiagnosticEntry>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error at the caller's location.
    #[track_caller]
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message.into(), Location::caller());
    }

    /// Record a warning at the caller's location.
    #[track_caller]
    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message.into(), Location::caller());
    }

    fn push(&mut self, severity: Severity, message: String, location: &'static Location<'static>) {
        match severity {
            Severity::Error => tracing::error!(
                file = location.file(),
                line = location.line(),
                "{message}"
            ),
            Severity::Warning => tracing::warn!(
                file = location.file(),
                line = location.line(),
                "{message}"
            ),
        }
        self.entries.push(DiagnosticEntry {
            severity,
            message,
            location,
        });
    }

    /// Entries recorded since the last drain, oldest first.
    pub fn entries(&self) -> &[DiagnosticEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if any recorded entry is an error.
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    /// Take every entry, one per line, leaving the log empty.
    pub fn drain(&mut self) -> String {
        let mut out = String::new();
        for entry in self.entries.drain(..) {
            out.push_str(&entry.to_string());
            out.push('\n');
        }
        out
    }

    /// Take every entry as structured values, leaving the log empty.
    pub fn take_entries(&mut self) -> Vec<DiagnosticEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Observability counters for link-level recoveries.
///
/// These never influence control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    /// Headers rejected because of the magic word.
    pub magic_errors: u64,
    /// Headers rejected because the CRC over the first 20 bytes failed.
    pub header_crc_errors: u64,
    /// Full frames rejected because the trailing CRC failed or the frame
    /// was not completely available.
    pub frame_crc_errors: u64,
    /// Commands sent again because the module reported an older transaction.
    pub retransmits: u64,
}

impl fmt::Display for LinkCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "magic={} crc1={} crc2={} retransmit={}",
            self.magic_errors, self.header_crc_errors, self.frame_crc_errors, self.retransmits
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_order_and_severity() {
        let mut diag = Diagnostics::new();
        diag.error("first");
        diag.warning("second");
        assert_eq!(diag.len(), 2);
        assert_eq!(diag.entries()[0].severity, Severity::Error);
        assert_eq!(diag.entries()[1].message, "second");
        assert!(diag.has_errors());
    }

    #[test]
    fn entry_records_caller_location() {
        let mut diag = Diagnostics::new();
        let line = line!() + 1;
        diag.error("here");
        let entry = &diag.entries()[0];
        assert_eq!(entry.location.line(), line);
        assert!(entry.location.file().ends_with("diagnostics.rs"));
    }

    #[test]
    fn drain_formats_and_empties() {
        let mut diag = Diagnostics::new();
        diag.error("Timeout");
        let text = diag.drain();
        assert!(text.starts_with("[ERROR] Timeout (diagnostics.rs, line "));
        assert!(text.ends_with(")\n"));
        assert!(diag.is_empty());
        assert_eq!(diag.drain(), "");
    }

    #[test]
    fn take_entries_empties() {
        let mut diag = Diagnostics::new();
        diag.warning("w");
        let taken = diag.take_entries();
        assert_eq!(taken.len(), 1);
        assert!(diag.is_empty());
        assert!(!diag.has_errors());
    }

    #[test]
    fn counters_display() {
        let c = LinkCounters {
            magic_errors: 1,
            header_crc_errors: 2,
            frame_crc_errors: 3,
            retransmits: 4,
        };
        assert_eq!(c.to_string(), "magic=1 crc1=2 crc2=3 retransmit=4");
    }
}
