//! HrocmDevice -- the session façade for one module.
//!
//! This module ties the protocol engine ([`Link`], the command shapes and
//! the poll loops) to the cached session state: the capability record, the
//! channel plan held on the host, the task tracker and the results of the
//! last scan.
//!
//! A session is `Uninitialized` until the first GETDEV succeeds and then
//! stays `Initialized` until it is re-opened, the firmware is restarted or
//! the bandwidth mode changes. Every operation that converts frequencies
//! or checks slice bounds initializes on demand.
//!
//! Every failure is returned to the caller and also recorded in the
//! session's [`Diagnostics`] log, which [`take_last_error`] drains.
//!
//! [`take_last_error`]: HrocmDevice::take_last_error

use hrocm_core::diagnostics::{Diagnostics, LinkCounters};
use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;
use hrocm_wire::frame::{Header, Pipeline};
use hrocm_wire::records::{BandwidthMode, DeviceInfo};
use hrocm_wire::units::SliceGrid;
use hrocm_wire::Attribute;
use tracing::{debug, info};

use crate::attributes::{NumericKey, TextKey, VectorKey};
use crate::link::Link;
use crate::plan::ChannelPlan;
use crate::postprocess::ScanData;
use crate::tracker::{ScanStatus, TaskTracker};

/// A connected HROCM module.
///
/// Constructed via [`HrocmBuilder`](crate::builder::HrocmBuilder). The
/// session is single-owner: every operation takes `&mut self`, and callers
/// sharing one module between tasks must serialize access themselves.
pub struct HrocmDevice {
    link: Link<Box<dyn Transport>>,
    info: Option<DeviceInfo>,
    grid: Option<SliceGrid>,
    plan: ChannelPlan,
    tracker: TaskTracker,
    scan: ScanData,
}

impl HrocmDevice {
    pub(crate) fn new(link: Link<Box<dyn Transport>>) -> Self {
        HrocmDevice {
            link,
            info: None,
            grid: None,
            plan: ChannelPlan::default(),
            tracker: TaskTracker::new(),
            scan: ScanData::default(),
        }
    }

    /// Record a failed operation in the diagnostics log.
    #[track_caller]
    fn note<T>(&mut self, what: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.link.diagnostics_mut().error(format!("{what}: {e}"));
        }
        result
    }

    // ---------------------------------------------------------------
    // Session
    // ---------------------------------------------------------------

    /// Acquire the transport. Cached module state is dropped.
    pub async fn open(&mut self) -> Result<()> {
        self.info = None;
        self.grid = None;
        self.tracker.invalidate();
        let result = self.link.transport_mut().open().await;
        self.note("Failed to open transport", result)?;
        debug!("transport opened");
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        let result = self.link.transport_mut().close().await;
        self.note("Failed to close transport", result)?;
        debug!("transport closed");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.transport().is_connected()
    }

    /// Returns `true` once a usable capability record is cached.
    pub fn is_initialized(&self) -> bool {
        self.grid.is_some()
    }

    /// Fetch the capability record unless it is already cached.
    pub async fn ensure_initialized(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.query_state().await
    }

    /// Re-read the capability record and the current header.
    pub async fn query_state(&mut self) -> Result<()> {
        let result = self.link.get_device().await;
        let (_, info) = self.note("GETDEV failed", result)?;
        let grid = SliceGrid::from_device(&info);
        info!(
            serial = %info.serial_number,
            firmware = %info.firmware_version(),
            "module capabilities read"
        );
        self.info = Some(info);
        self.grid = None;
        self.grid = Some(self.note("Module capability record unusable", grid)?);
        Ok(())
    }

    /// Cached capability record, if GETDEV has succeeded.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Cached slice grid.
    pub fn grid(&self) -> Result<SliceGrid> {
        self.grid
            .ok_or_else(|| Error::NotInitialized("module capabilities not read yet".into()))
    }

    /// The most recent header that validated.
    pub fn last_header(&self) -> Option<&Header> {
        self.link.last_header()
    }

    /// Human-readable dump of the most recent header.
    pub fn header_dump(&self) -> Option<String> {
        self.link.last_header().map(|h| h.to_string())
    }

    pub fn counters(&self) -> LinkCounters {
        self.link.counters()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.link.diagnostics()
    }

    /// Drain the accumulated error and warning messages.
    pub fn take_last_error(&mut self) -> String {
        self.link.diagnostics_mut().drain()
    }

    // ---------------------------------------------------------------
    // Channel plan
    // ---------------------------------------------------------------

    /// The plan held on the host. It may have been edited since it was
    /// last transmitted.
    pub fn channel_plan(&self) -> &ChannelPlan {
        &self.plan
    }

    /// Validate `plan`, store it and upload it.
    ///
    /// Nothing is transmitted if validation fails.
    pub async fn set_channel_plan(&mut self, plan: ChannelPlan) -> Result<()> {
        self.ensure_initialized().await?;
        let grid = self.grid()?;
        let checked = plan.validate(&grid);
        self.note("Invalid channel plan", checked)?;
        self.plan = plan;
        self.apply_channel_plan().await
    }

    /// Upload the stored plan. Any scan in flight is forgotten.
    pub async fn apply_channel_plan(&mut self) -> Result<()> {
        self.ensure_initialized().await?;
        let grid = self.grid()?;
        let checked = if self.plan.is_empty() {
            Err(Error::InvalidParameter("channel plan is empty".into()))
        } else {
            self.plan.validate(&grid)
        };
        self.note("Invalid channel plan", checked)?;

        self.tracker.invalidate();
        if !self.plan.power.is_empty() {
            let result = self.link.set_power_plan(&self.plan.power).await;
            self.note("SETMPPW failed", result)?;
        }
        if self.plan.has_osnr() {
            let result = self.link.set_osnr_plan(&self.plan.osnr).await;
            self.note("SETMPOSNR failed", result)?;
        }
        debug!(
            power = self.plan.power.len(),
            osnr = self.plan.osnr.len(),
            "channel plan uploaded"
        );
        Ok(())
    }

    /// Forget the stored plan and the last results.
    pub fn preset(&mut self) {
        self.plan = ChannelPlan::default();
        self.scan = ScanData::default();
        self.tracker.invalidate();
    }

    // ---------------------------------------------------------------
    // Scans
    // ---------------------------------------------------------------

    /// Trigger a scan: the power pipeline always, the OSNR pipeline when
    /// an OSNR plan is stored. Returns the trigger's sequence number.
    pub async fn start_scan(&mut self) -> Result<u32> {
        self.ensure_initialized().await?;
        let mut mask = Pipeline::Power.task_mask();
        if self.plan.has_osnr() {
            mask |= Pipeline::Osnr.task_mask();
        }
        let result = self.link.trigger(mask).await;
        let sequence = self.note("Failed to start scan", result)?;
        self.tracker.record_trigger(sequence, mask);
        debug!(seq = sequence, mask, "scan started");
        Ok(sequence)
    }

    /// Wait for the started scan, fetch its results and post-process them.
    pub async fn read_scan(&mut self) -> Result<&ScanData> {
        if !self.tracker.is_valid() {
            let result: Result<()> = Err(Error::NotInitialized("No scan started".into()));
            self.note("Failed to read scan", result)?;
        }
        let result = self.fetch_scan().await;
        let scan = self.note("Failed to read scan", result)?;
        self.scan = scan;
        self.tracker.invalidate();
        Ok(&self.scan)
    }

    async fn fetch_scan(&mut self) -> Result<ScanData> {
        let triggered: Vec<(Pipeline, u32)> = self.tracker.triggered().collect();
        for &(pipeline, sequence) in &triggered {
            self.link.wait_task_complete(pipeline, sequence).await?;
        }
        let power = self.link.get_power_results().await?;
        let osnr = if Pipeline::Osnr.in_mask(self.tracker.mask()) {
            self.link.get_osnr_results().await?
        } else {
            Default::default()
        };
        debug!(
            power = power.records.len(),
            osnr = osnr.records.len(),
            scan = power.header.scan,
            "scan results read"
        );
        Ok(ScanData::new(power, osnr))
    }

    /// Start a scan and read it.
    pub async fn run_full_scan(&mut self) -> Result<&ScanData> {
        self.start_scan().await?;
        self.read_scan().await
    }

    /// Check scan progress with a single header poll.
    pub async fn is_scan_finished(&mut self) -> ScanStatus {
        if !self.tracker.is_valid() {
            return ScanStatus::Idle;
        }
        match self.link.poll_short().await {
            Ok(header) => self.tracker.status(&header),
            Err(e) => {
                self.link
                    .diagnostics_mut()
                    .warning(format!("Scan progress unknown: {e}"));
                ScanStatus::Indeterminate
            }
        }
    }

    /// Results of the last scan read.
    pub fn scan_data(&self) -> &ScanData {
        &self.scan
    }

    // ---------------------------------------------------------------
    // Named attributes
    // ---------------------------------------------------------------

    pub async fn get_numeric(&mut self, key: NumericKey) -> Result<f64> {
        let what = format!("Failed to get key {key}");
        let ready = self.ensure_initialized().await;
        self.note(&what, ready)?;
        let value = match (self.info.as_ref(), self.link.last_header()) {
            (Some(info), Some(header)) => Ok(key.read(info, header, &self.scan)),
            _ => Err(Error::NotInitialized("module state not read yet".into())),
        };
        self.note(&what, value)
    }

    /// Numeric keys are read-only; this always fails.
    pub fn set_numeric(&mut self, key: NumericKey, value: f64) -> Result<()> {
        let result = Err(Error::InvalidParameter(format!(
            "{key} is read-only (tried {value})"
        )));
        self.note(&format!("Failed to set key {key}"), result)
    }

    /// Read a text key. [`TextKey::LastError`] drains the diagnostics log
    /// and never touches the link.
    pub async fn get_text(&mut self, key: TextKey) -> Result<String> {
        if key == TextKey::LastError {
            return Ok(self.take_last_error());
        }
        let what = format!("Failed to get key {key}");
        let ready = self.ensure_initialized().await;
        self.note(&what, ready)?;
        let value = self
            .info
            .as_ref()
            .and_then(|info| key.read(info))
            .ok_or_else(|| Error::NotInitialized("module capabilities not read yet".into()));
        self.note(&what, value)
    }

    /// Write a text key. Only [`TextKey::ModuleId`] is writable.
    pub async fn set_text(&mut self, key: TextKey, value: &str) -> Result<()> {
        if key != TextKey::ModuleId {
            let result = Err(Error::InvalidParameter(format!("{key} is read-only")));
            return self.note(&format!("Failed to set key {key}"), result);
        }
        self.set_module_id(value).await
    }

    pub async fn get_vector(&mut self, key: VectorKey) -> Result<Vec<f64>> {
        let what = format!("Failed to get key {key}");
        let ready = self.ensure_initialized().await;
        self.note(&what, ready)?;
        let values = self.grid().map(|grid| key.read(&grid, &self.plan, &self.scan));
        self.note(&what, values)
    }

    /// Edit the stored plan. Nothing is transmitted; call
    /// [`apply_channel_plan`](Self::apply_channel_plan) afterwards.
    pub async fn set_vector(&mut self, key: VectorKey, values: &[f64]) -> Result<()> {
        self.ensure_initialized().await?;
        let grid = self.grid()?;
        let result = key.write(&grid, &mut self.plan, values);
        self.tracker.invalidate();
        self.note(&format!("Failed to set key {key}"), result)
    }

    // ---------------------------------------------------------------
    // Command passthroughs
    // ---------------------------------------------------------------

    /// Reset the module under the long timeout.
    pub async fn reset(&mut self) -> Result<()> {
        let result = self.link.long_budget().reset().await;
        self.note("RES failed", result)?;
        self.tracker.invalidate();
        info!("module reset");
        Ok(())
    }

    /// Send a NOP and wait for it to be confirmed.
    pub async fn ping(&mut self) -> Result<()> {
        let result = self.link.nop().await;
        self.note("NOP failed", result)?;
        Ok(())
    }

    /// Clear latched hardware errors.
    pub async fn clear_errors(&mut self) -> Result<()> {
        let result = self.link.clear_errors().await;
        self.note("CLE failed", result)?;
        Ok(())
    }

    pub async fn set_module_id(&mut self, id: &str) -> Result<()> {
        let result = self.link.set_module_id(id).await;
        self.note("MID failed", result)?;
        if let Some(info) = self.info.as_mut() {
            info.module_id = id.trim_matches(' ').to_string();
        }
        Ok(())
    }

    /// Transfer a firmware image. It is not active until
    /// [`firmware_save`](Self::firmware_save) and
    /// [`firmware_execute`](Self::firmware_execute).
    pub async fn firmware_upload(&mut self, image: &[u8]) -> Result<()> {
        let result = self.link.firmware_transfer(image).await;
        self.note("FWT failed", result)?;
        info!(bytes = image.len(), "firmware transferred");
        Ok(())
    }

    pub async fn firmware_save(&mut self) -> Result<()> {
        let result = self.link.long_budget().firmware_save().await;
        self.note("FWS failed", result)?;
        Ok(())
    }

    /// Boot the saved firmware. The capability record is re-read on the
    /// next operation that needs it.
    pub async fn firmware_execute(&mut self) -> Result<()> {
        let result = self.link.long_budget().firmware_execute().await;
        self.note("FWE failed", result)?;
        self.forget_capabilities();
        info!("firmware restarted");
        Ok(())
    }

    /// Configured number of averaged sweeps.
    pub async fn averaging(&mut self) -> Result<u16> {
        let result = self.link.attribute_get(Attribute::Averaging).await;
        self.note("ATG failed", result)
    }

    /// Number of sweeps averaged by the running configuration.
    pub async fn active_averaging(&mut self) -> Result<u16> {
        let result = self.link.attribute_get(Attribute::ActiveAveraging).await;
        self.note("ATG failed", result)
    }

    pub async fn set_averaging(&mut self, sweeps: u16) -> Result<()> {
        if sweeps == 0 {
            let result = Err(Error::InvalidParameter("averaging must be at least 1".into()));
            return self.note("ATS failed", result);
        }
        let result = self.link.attribute_set(Attribute::Averaging, sweeps).await;
        self.note("ATS failed", result)?;
        Ok(())
    }

    pub async fn clear_averaging(&mut self) -> Result<()> {
        let result = self.link.attribute_clear(Attribute::Averaging).await;
        self.note("ATC failed", result)?;
        Ok(())
    }

    /// Bandwidth mode of the running configuration.
    pub async fn bandwidth_mode(&mut self) -> Result<BandwidthMode> {
        let result = self.link.attribute_get(Attribute::ActiveBandwidthMode).await;
        let flag = self.note("ATG failed", result)?;
        Ok(BandwidthMode::from_flag(flag as u8))
    }

    /// Select the OSNR bandwidth mode. The capability record is re-read
    /// on the next operation that needs it.
    pub async fn set_bandwidth_mode(&mut self, mode: BandwidthMode) -> Result<()> {
        let result = self
            .link
            .attribute_set(Attribute::BandwidthMode, u16::from(mode.flag()))
            .await;
        self.note("ATS failed", result)?;
        self.forget_capabilities();
        Ok(())
    }

    pub async fn clear_bandwidth_mode(&mut self) -> Result<()> {
        let result = self.link.attribute_clear(Attribute::BandwidthMode).await;
        self.note("ATC failed", result)?;
        self.forget_capabilities();
        Ok(())
    }

    fn forget_capabilities(&mut self) {
        self.info = None;
        self.grid = None;
    }
}

impl std::fmt::Debug for HrocmDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HrocmDevice")
            .field("initialized", &self.is_initialized())
            .field("sequence", &self.link.current_sequence())
            .field("plan", &self.plan)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
