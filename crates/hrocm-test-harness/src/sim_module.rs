//! Behavioural model of an HROCM module.
//!
//! [`SimulatedModule`] implements [`Transport`] and answers exchanges the
//! way the module does: the receive buffer always carries the frame the
//! module had staged *before* it saw the transmit buffer, a transmit
//! buffer holding a valid command frame is executed, and an all-zero
//! transmit buffer is a plain poll. Every exchange is one tick of the
//! model's clock; command processing and scans complete a configurable
//! number of ticks later.
//!
//! The module state is shared with a [`SimHandle`] so tests can inject
//! faults and inspect the module after the transport has been boxed into
//! a device.
//!
//! # Example
//!
//! ```
//! use hrocm_test_harness::SimulatedModule;
//!
//! let module = SimulatedModule::with_grid(1_913_500_000, 500_000, 80);
//! let handle = module.handle();
//! handle.corrupt_next_responses(2);
//! assert_eq!(handle.transfer_count(), 0);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Buf;
use hrocm_core::error::{Error, Result};
use hrocm_core::transport::Transport;
use hrocm_core::text_field;
use hrocm_wire::frame::{
    encode_frame, validate_full_frame, Header, Pipeline, HEADER_LEN, MAGIC_V1, SEQARR_LEN,
};
use hrocm_wire::records::{
    decode_records, encode_records, BandwidthMode, DeviceInfo, OsnrPlanRecord, OsnrResults,
    OsnrScanRecord, PowerPlanRecord, PowerResults, PowerScanRecord, Record, ScanHeader,
};
use hrocm_wire::units::{FREQ_SCALE, POWER_SCALE};
use hrocm_wire::Opcode;

/// Optical power density in dBm per slice as a function of frequency in THz.
pub type Spectrum = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Result codes the model reports for rejected commands.
pub mod codes {
    pub const UNKNOWN_OPCODE: i32 = 1;
    pub const BAD_PAYLOAD: i32 = 2;
    pub const BAD_PLAN: i32 = 3;
    pub const NO_PLAN: i32 = 4;
    pub const BAD_ATTRIBUTE: i32 = 5;
}

const DEFAULT_AVERAGING: u16 = 1;

/// A capability record with the given slice grid and neutral identity
/// fields. `Nmax` equals `Smax` so a full high-resolution plan fits.
pub fn device_info(first_slice_freq: u32, slice_width: u32, max_slices: u16) -> DeviceInfo {
    DeviceInfo {
        hardware_revision: 0x0102_0000,
        firmware_revision: 0x0304_0500,
        serial_number: "SIM0001".into(),
        manufacturing_date: "2024-01-15".into(),
        label: "Simulated HROCM".into(),
        module_id: "sim".into(),
        max_ports: 1,
        max_slices,
        max_channels: max_slices,
        bandwidth_mode: BandwidthMode::Threshold,
        slice_width,
        first_slice_freq,
        capabilities: 0,
    }
}

/// A 50 GHz comb of channels around 193.1 THz over a -40 dBm floor.
fn default_spectrum() -> Spectrum {
    Arc::new(|thz: f64| {
        let grid = 0.05;
        let nearest = ((thz - 193.1) / grid).round() * grid + 193.1;
        let offset = (thz - nearest) / 0.012;
        -40.0 + 35.0 * (-offset * offset).exp()
    })
}

fn to_fixed(db: f64) -> i16 {
    (db * POWER_SCALE)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

#[derive(Debug, Clone, Copy)]
struct ScheduledScan {
    pipeline: Pipeline,
    sequence: u32,
    remaining: u32,
}

#[derive(Debug, Default)]
struct Faults {
    drop_commands: u32,
    corrupt_responses: u32,
    powered_off: u32,
    legacy: u32,
    corrupt_payload_reads: u32,
    forced_error: Option<i32>,
}

struct State {
    info: DeviceInfo,
    spectrum: Spectrum,
    connected: bool,

    // Staged reply.
    sequence: u32,
    opcode: u8,
    result: i32,
    payload: Vec<u8>,
    busy: u32,

    seqarr: [u32; SEQARR_LEN],
    scans: Vec<ScheduledScan>,
    command_latency: u32,
    scan_latency: u32,
    latched_status: u32,

    power_plan: Vec<PowerPlanRecord>,
    osnr_plan: Vec<OsnrPlanRecord>,
    scan_counter: u32,
    power_results: PowerResults,
    osnr_results: OsnrResults,
    averaging: u16,

    firmware: Vec<u8>,
    firmware_saved: Option<Vec<u8>>,
    firmware_executions: u32,
    resets: u32,

    faults: Faults,
    transfers: u64,
    commands: Vec<u8>,
    dropped: u32,
}

impl State {
    fn new(info: DeviceInfo) -> Self {
        State {
            info,
            spectrum: default_spectrum(),
            connected: true,
            sequence: 0,
            opcode: 0,
            result: 0,
            payload: Vec::new(),
            busy: 0,
            seqarr: [0; SEQARR_LEN],
            scans: Vec::new(),
            command_latency: 0,
            scan_latency: 2,
            latched_status: 0,
            power_plan: Vec::new(),
            osnr_plan: Vec::new(),
            scan_counter: 0,
            power_results: PowerResults::default(),
            osnr_results: OsnrResults::default(),
            averaging: DEFAULT_AVERAGING,
            firmware: Vec::new(),
            firmware_saved: None,
            firmware_executions: 0,
            resets: 0,
            faults: Faults::default(),
            transfers: 0,
            commands: Vec::new(),
            dropped: 0,
        }
    }

    // ---------------------------------------------------------------
    // Output side
    // ---------------------------------------------------------------

    fn staged_frame(&mut self) -> Vec<u8> {
        if self.faults.powered_off > 0 {
            self.faults.powered_off -= 1;
            return vec![0xFF; HEADER_LEN];
        }

        let pending = self
            .scans
            .iter()
            .fold(0u32, |mask, scan| mask | scan.pipeline.task_mask());
        let mut header = Header {
            result: if self.busy > 0 { -1 } else { self.result },
            latched_status: self.latched_status,
            case_temperature: 352,
            internal_temperature: 401,
            pending,
            seqarr: self.seqarr,
            ..Header::new(self.opcode, self.sequence)
        };
        if self.faults.legacy > 0 {
            self.faults.legacy -= 1;
            header.magic = MAGIC_V1;
        }

        let payload: &[u8] = if self.busy > 0 || self.result != 0 {
            &[]
        } else {
            &self.payload
        };
        let mut frame = match encode_frame(&header, payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "simulated reply does not fit a transfer");
                Vec::new()
            }
        };

        if self.faults.corrupt_responses > 0 {
            self.faults.corrupt_responses -= 1;
            if let Some(byte) = frame.get_mut(8) {
                *byte ^= 0x01;
            }
        }
        frame
    }

    // ---------------------------------------------------------------
    // Clock
    // ---------------------------------------------------------------

    fn advance(&mut self) {
        self.transfers += 1;
        self.busy = self.busy.saturating_sub(1);

        let mut finished = Vec::new();
        self.scans.retain_mut(|scan| {
            scan.remaining = scan.remaining.saturating_sub(1);
            if scan.remaining == 0 {
                finished.push(*scan);
                false
            } else {
                true
            }
        });
        for scan in finished {
            self.complete_scan(scan);
        }
    }

    fn complete_scan(&mut self, scan: ScheduledScan) {
        let header = ScanHeader {
            plan_sequence: self.seqarr[Pipeline::ChannelPlan.index()],
            scan: self.scan_counter,
        };
        match scan.pipeline {
            Pipeline::Power => {
                let records = self
                    .power_plan
                    .iter()
                    .map(|r| PowerScanRecord {
                        port: r.port,
                        start: r.start,
                        end: r.end,
                        power: to_fixed(self.channel_power(r.start, r.end)),
                    })
                    .collect();
                self.power_results = PowerResults { header, records };
            }
            Pipeline::Osnr => {
                let records = self.osnr_plan.iter().map(|r| self.measure_osnr(r)).collect();
                self.osnr_results = OsnrResults { header, records };
            }
            _ => {}
        }
        self.seqarr[scan.pipeline.index()] = scan.sequence;
        tracing::trace!(pipeline = %scan.pipeline, seq = scan.sequence, "simulated scan complete");
    }

    fn slice_center_thz(&self, slice: u16) -> f64 {
        let width = f64::from(self.info.slice_width);
        ((f64::from(slice) - 0.5) * width + f64::from(self.info.first_slice_freq)) / FREQ_SCALE
    }

    fn slice_power(&self, slice: u16) -> f64 {
        (self.spectrum)(self.slice_center_thz(slice))
    }

    /// Integrated power of slices `start..=end` in dBm.
    fn channel_power(&self, start: u16, end: u16) -> f64 {
        let linear: f64 = (start..=end)
            .map(|s| 10f64.powf(self.slice_power(s) / 10.0))
            .sum();
        10.0 * linear.max(f64::MIN_POSITIVE).log10()
    }

    fn measure_osnr(&self, plan: &OsnrPlanRecord) -> OsnrScanRecord {
        let smax = self.info.max_slices;
        let center = ((u32::from(plan.center_start) + u32::from(plan.center_stop)) / 2) as u16;
        let below = |offset: u16| center.saturating_sub(offset).max(1);
        let above = |offset: u16| center.saturating_add(offset).min(smax);

        let half = if self.info.bandwidth_mode == BandwidthMode::Threshold {
            plan.tag_range
        } else {
            plan.bandwidth_threshold
        };
        let power = self.channel_power(below(half), above(half));
        let noise_lower = below(plan.noise_lower);
        let noise_upper = above(plan.noise_upper);
        let noise = (self.slice_power(noise_lower) + self.slice_power(noise_upper)) / 2.0;

        OsnrScanRecord {
            port: plan.port,
            start: plan.center_start,
            end: plan.center_stop,
            osnr: to_fixed(self.slice_power(center) - noise),
            power: to_fixed(power),
            noise_tag_lower: noise_lower,
            noise_tag_upper: noise_upper,
            bandwidth_lower: below(half),
            bandwidth_upper: above(half),
            center,
        }
    }

    // ---------------------------------------------------------------
    // Input side
    // ---------------------------------------------------------------

    fn accept(&mut self, tx: &[u8]) {
        if tx.iter().all(|&b| b == 0) {
            return;
        }
        let header = match validate_full_frame(tx, tx.len()) {
            Ok(header) => header,
            Err(e) => {
                tracing::trace!(error = %e, "simulated module ignored a malformed command");
                return;
            }
        };
        if self.faults.drop_commands > 0 {
            self.faults.drop_commands -= 1;
            self.dropped += 1;
            tracing::trace!(seq = header.sequence, "simulated module dropped a command");
            return;
        }

        let payload = if tx.len() > HEADER_LEN {
            &tx[HEADER_LEN..tx.len() - 4]
        } else {
            &[][..]
        };
        self.commands.push(header.opcode);
        self.sequence = header.sequence;
        self.opcode = header.opcode;
        self.payload.clear();
        self.busy = self.command_latency;

        let outcome = match self.faults.forced_error.take() {
            Some(code) => Err(code),
            None => self.execute(header.opcode, header.sequence, payload),
        };
        match outcome {
            Ok(reply) => {
                self.result = 0;
                self.payload = reply;
            }
            Err(code) => self.result = code,
        }
    }

    fn execute(
        &mut self,
        opcode: u8,
        seq: u32,
        mut payload: &[u8],
    ) -> std::result::Result<Vec<u8>, i32> {
        let opcode = Opcode::try_from(opcode).map_err(|_| codes::UNKNOWN_OPCODE)?;
        let none = Vec::new();
        match opcode {
            Opcode::Nop => Ok(none),
            Opcode::ClearErrors => {
                self.latched_status = 0;
                Ok(none)
            }
            Opcode::Reset => {
                self.resets += 1;
                self.scans.clear();
                self.latched_status = 0;
                Ok(none)
            }
            Opcode::ModuleId => {
                if payload.len() > 32 {
                    return Err(codes::BAD_PAYLOAD);
                }
                self.info.module_id = text_field(payload);
                Ok(none)
            }
            Opcode::TriggerProcess => {
                if payload.len() != 4 {
                    return Err(codes::BAD_PAYLOAD);
                }
                let mask = payload.get_u32_le();
                if (Pipeline::Power.in_mask(mask) && self.power_plan.is_empty())
                    || (Pipeline::Osnr.in_mask(mask) && self.osnr_plan.is_empty())
                {
                    return Err(codes::NO_PLAN);
                }
                self.scan_counter = self.scan_counter.wrapping_add(1);
                for pipeline in [Pipeline::Power, Pipeline::Osnr] {
                    if pipeline.in_mask(mask) {
                        self.scans.push(ScheduledScan {
                            pipeline,
                            sequence: seq,
                            remaining: self.scan_latency.max(1),
                        });
                    }
                }
                Ok(none)
            }
            Opcode::FirmwareTransfer => {
                if payload.len() < 4 {
                    return Err(codes::BAD_PAYLOAD);
                }
                let offset = payload.get_u32_le() as usize;
                let end = offset + payload.len();
                if self.firmware.len() < end {
                    self.firmware.resize(end, 0);
                }
                self.firmware[offset..end].copy_from_slice(payload);
                Ok(none)
            }
            Opcode::FirmwareSave => {
                self.firmware_saved = Some(std::mem::take(&mut self.firmware));
                Ok(none)
            }
            Opcode::FirmwareExecute => {
                self.firmware_executions += 1;
                Ok(none)
            }
            Opcode::GetDevice => Ok(self.info.encode()),
            Opcode::SetPowerPlan => {
                let plan = self.decode_plan::<PowerPlanRecord>(payload)?;
                let smax = self.info.max_slices;
                if plan.iter().any(|r| r.start < 1 || r.end < r.start || r.end > smax) {
                    return Err(codes::BAD_PLAN);
                }
                self.power_plan = plan;
                self.seqarr[Pipeline::ChannelPlan.index()] = seq;
                Ok(none)
            }
            Opcode::SetOsnrPlan => {
                let plan = self.decode_plan::<OsnrPlanRecord>(payload)?;
                let smax = self.info.max_slices;
                let out_of_range = |r: &OsnrPlanRecord| {
                    r.center_start < 1 || r.center_stop < r.center_start || r.center_stop > smax
                };
                if plan.iter().any(out_of_range) {
                    return Err(codes::BAD_PLAN);
                }
                self.osnr_plan = plan;
                self.seqarr[Pipeline::ChannelPlan.index()] = seq;
                Ok(none)
            }
            Opcode::GetPowerPlan => Ok(encode_records(&self.power_plan)),
            Opcode::GetPowerResults => Ok(self.power_results.encode()),
            Opcode::GetOsnrResults => Ok(self.osnr_results.encode()),
            Opcode::AttributeSet => {
                if payload.len() != 4 {
                    return Err(codes::BAD_PAYLOAD);
                }
                let selector = payload.get_u16_le();
                let value = payload.get_u16_le();
                match selector {
                    0 if value > 0 => self.averaging = value,
                    2 => self.info.bandwidth_mode = BandwidthMode::from_flag(value as u8),
                    _ => return Err(codes::BAD_ATTRIBUTE),
                }
                Ok(none)
            }
            Opcode::AttributeGet => {
                if payload.len() != 2 {
                    return Err(codes::BAD_PAYLOAD);
                }
                let value = match payload.get_u16_le() {
                    0 | 1 => self.averaging,
                    2 | 3 => u16::from(self.info.bandwidth_mode.flag()),
                    _ => return Err(codes::BAD_ATTRIBUTE),
                };
                Ok(value.to_le_bytes().to_vec())
            }
            Opcode::AttributeClear => {
                if payload.len() != 2 {
                    return Err(codes::BAD_PAYLOAD);
                }
                match payload.get_u16_le() {
                    0 => self.averaging = DEFAULT_AVERAGING,
                    2 => self.info.bandwidth_mode = BandwidthMode::Threshold,
                    _ => return Err(codes::BAD_ATTRIBUTE),
                }
                Ok(none)
            }
        }
    }

    fn decode_plan<R: Record>(&self, payload: &[u8]) -> std::result::Result<Vec<R>, i32> {
        if payload.is_empty() || payload.len() % R::LEN != 0 {
            return Err(codes::BAD_PAYLOAD);
        }
        let plan = decode_records::<R>(payload);
        if plan.len() > usize::from(self.info.max_channels) {
            return Err(codes::BAD_PLAN);
        }
        Ok(plan)
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if tx.len() != rx.len() {
            return Err(Error::Transport(format!(
                "transfer length mismatch: tx {} rx {}",
                tx.len(),
                rx.len()
            )));
        }

        let mut frame = self.staged_frame();
        if self.faults.corrupt_payload_reads > 0
            && frame.len() > HEADER_LEN
            && rx.len() >= frame.len()
        {
            self.faults.corrupt_payload_reads -= 1;
            frame[HEADER_LEN] ^= 0x80;
        }
        rx.fill(0);
        let n = frame.len().min(rx.len());
        rx[..n].copy_from_slice(&frame[..n]);

        self.advance();
        self.accept(tx);
        Ok(())
    }
}

// ---------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------

/// A simulated HROCM module usable as a [`Transport`].
pub struct SimulatedModule {
    state: Arc<Mutex<State>>,
}

impl SimulatedModule {
    pub fn new(info: DeviceInfo) -> Self {
        SimulatedModule {
            state: Arc::new(Mutex::new(State::new(info))),
        }
    }

    /// A module with the given slice grid and default identity fields.
    pub fn with_grid(first_slice_freq: u32, slice_width: u32, max_slices: u16) -> Self {
        Self::new(device_info(first_slice_freq, slice_width, max_slices))
    }

    /// Replace the optical input.
    pub fn with_spectrum(self, spectrum: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        lock(&self.state).spectrum = Arc::new(spectrum);
        self
    }

    /// Ticks a command stays pending before its result is visible.
    pub fn with_command_latency(self, ticks: u32) -> Self {
        lock(&self.state).command_latency = ticks;
        self
    }

    /// Ticks between an accepted trigger and its pipeline completing.
    pub fn with_scan_latency(self, ticks: u32) -> Self {
        lock(&self.state).scan_latency = ticks;
        self
    }

    /// Shared handle for inspection and fault injection.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl fmt::Debug for SimulatedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedModule")
            .field("transfers", &lock(&self.state).transfers)
            .finish()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for SimulatedModule {
    async fn open(&mut self) -> Result<()> {
        lock(&self.state).connected = true;
        Ok(())
    }

    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        lock(&self.state).exchange(tx, rx)
    }

    async fn close(&mut self) -> Result<()> {
        lock(&self.state).connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

/// Handle onto a [`SimulatedModule`]'s state.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<State>>,
}

impl SimHandle {
    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut lock(&self.state))
    }

    // -- fault injection --

    /// Silently ignore the next `n` command frames.
    pub fn drop_next_commands(&self, n: u32) {
        self.with(|s| s.faults.drop_commands = n);
    }

    /// Flip a header bit in the next `n` staged replies.
    pub fn corrupt_next_responses(&self, n: u32) {
        self.with(|s| s.faults.corrupt_responses = n);
    }

    /// Answer the next `n` exchanges with an all-ones bus.
    pub fn power_off_for(&self, n: u32) {
        self.with(|s| s.faults.powered_off = n);
    }

    /// Answer the next `n` exchanges with the protocol 1 magic.
    pub fn respond_legacy_for(&self, n: u32) {
        self.with(|s| s.faults.legacy = n);
    }

    /// Flip a payload bit in the next `n` full-length reads.
    pub fn corrupt_next_payload_reads(&self, n: u32) {
        self.with(|s| s.faults.corrupt_payload_reads = n);
    }

    /// Reject the next command with `code`.
    pub fn fail_next_command(&self, code: i32) {
        self.with(|s| s.faults.forced_error = Some(code));
    }

    /// Change the capability record, e.g. to model an uncalibrated module.
    pub fn set_device_info(&self, info: DeviceInfo) {
        self.with(|s| s.info = info);
    }

    // -- inspection --

    pub fn transfer_count(&self) -> u64 {
        self.with(|s| s.transfers)
    }

    /// Opcodes of every command the module executed, in order.
    pub fn commands(&self) -> Vec<u8> {
        self.with(|s| s.commands.clone())
    }

    /// Number of command frames dropped by fault injection.
    pub fn dropped_commands(&self) -> u32 {
        self.with(|s| s.dropped)
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.with(|s| s.info.clone())
    }

    pub fn power_plan(&self) -> Vec<PowerPlanRecord> {
        self.with(|s| s.power_plan.clone())
    }

    pub fn osnr_plan(&self) -> Vec<OsnrPlanRecord> {
        self.with(|s| s.osnr_plan.clone())
    }

    pub fn averaging(&self) -> u16 {
        self.with(|s| s.averaging)
    }

    pub fn firmware_image(&self) -> Vec<u8> {
        self.with(|s| s.firmware.clone())
    }

    pub fn saved_firmware(&self) -> Option<Vec<u8>> {
        self.with(|s| s.firmware_saved.clone())
    }

    pub fn firmware_executions(&self) -> u32 {
        self.with(|s| s.firmware_executions)
    }

    pub fn resets(&self) -> u32 {
        self.with(|s| s.resets)
    }

    /// Integrated power the module would report for slices `start..=end`.
    pub fn expected_power(&self, start: u16, end: u16) -> i16 {
        self.with(|s| to_fixed(s.channel_power(start, end)))
    }
}

impl fmt::Debug for SimHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrocm_wire::frame::{encode_command, payload, validate_header};

    fn module() -> SimulatedModule {
        SimulatedModule::with_grid(1_913_500_000, 500_000, 80)
    }

    async fn poll(sim: &mut SimulatedModule) -> Header {
        let mut rx = [0u8; HEADER_LEN];
        sim.transfer(&[0u8; HEADER_LEN], &mut rx).await.unwrap();
        validate_header(&rx).unwrap()
    }

    async fn send(sim: &mut SimulatedModule, opcode: Opcode, seq: u32, data: &[u8]) {
        let tx = encode_command(opcode, seq, data).unwrap();
        let mut rx = vec![0u8; tx.len()];
        sim.transfer(&tx, &mut rx).await.unwrap();
    }

    async fn read_payload(sim: &mut SimulatedModule) -> Vec<u8> {
        let header = poll(sim).await;
        let len = header.length as usize;
        let mut rx = vec![0u8; len];
        sim.transfer(&vec![0u8; len], &mut rx).await.unwrap();
        let header = validate_full_frame(&rx, len).unwrap();
        payload(&rx, &header).to_vec()
    }

    #[tokio::test]
    async fn reply_appears_on_next_exchange() {
        let mut sim = module();
        send(&mut sim, Opcode::Nop, 42, &[]).await;
        let header = poll(&mut sim).await;
        assert_eq!(header.sequence, 42);
        assert_eq!(header.opcode, Opcode::Nop.code());
        assert_eq!(header.result, 0);
    }

    #[tokio::test]
    async fn command_latency_reports_pending() {
        let mut sim = module().with_command_latency(2);
        send(&mut sim, Opcode::Nop, 7, &[]).await;
        assert!(poll(&mut sim).await.is_pending());
        assert!(poll(&mut sim).await.is_pending());
        assert!(!poll(&mut sim).await.is_pending());
    }

    #[tokio::test]
    async fn getdev_payload_decodes() {
        let mut sim = module();
        send(&mut sim, Opcode::GetDevice, 1, &[]).await;
        let info = DeviceInfo::decode(&read_payload(&mut sim).await).unwrap();
        assert_eq!(info.max_slices, 80);
        assert_eq!(info.slice_width, 500_000);
    }

    #[tokio::test]
    async fn trigger_without_plan_is_rejected() {
        let mut sim = module();
        send(&mut sim, Opcode::TriggerProcess, 3, &1u32.to_le_bytes()).await;
        assert_eq!(poll(&mut sim).await.result, codes::NO_PLAN);
    }

    #[tokio::test]
    async fn power_scan_completes_after_latency() {
        let mut sim = module().with_scan_latency(3);
        let plan = encode_records(&[PowerPlanRecord { port: 1, start: 1, end: 4 }]);
        send(&mut sim, Opcode::SetPowerPlan, 10, &plan).await;
        send(&mut sim, Opcode::TriggerProcess, 11, &1u32.to_le_bytes()).await;

        let mut polls = 0;
        loop {
            polls += 1;
            if poll(&mut sim).await.completed(Pipeline::Power) == 11 {
                break;
            }
            assert!(polls < 10);
        }
        assert_eq!(polls, 4);

        send(&mut sim, Opcode::GetPowerResults, 12, &[]).await;
        let results = PowerResults::decode(&read_payload(&mut sim).await).unwrap();
        assert_eq!(results.header.plan_sequence, 10);
        assert_eq!(results.records.len(), 1);
        assert_eq!(results.records[0].end, 4);
    }

    #[tokio::test]
    async fn dropped_command_leaves_old_reply() {
        let mut sim = module();
        let handle = sim.handle();
        send(&mut sim, Opcode::Nop, 1, &[]).await;
        handle.drop_next_commands(1);
        send(&mut sim, Opcode::Nop, 2, &[]).await;
        assert_eq!(poll(&mut sim).await.sequence, 1);
        assert_eq!(handle.dropped_commands(), 1);
    }

    #[tokio::test]
    async fn fault_injection_patterns() {
        let mut sim = module();
        let handle = sim.handle();
        let mut rx = [0u8; HEADER_LEN];

        handle.power_off_for(1);
        sim.transfer(&[0; HEADER_LEN], &mut rx).await.unwrap();
        assert_eq!(validate_header(&rx), Err(hrocm_core::FrameError::MagicAllOnes));

        handle.respond_legacy_for(1);
        sim.transfer(&[0; HEADER_LEN], &mut rx).await.unwrap();
        assert_eq!(validate_header(&rx), Err(hrocm_core::FrameError::LegacyProtocol));

        handle.corrupt_next_responses(1);
        sim.transfer(&[0; HEADER_LEN], &mut rx).await.unwrap();
        assert!(validate_header(&rx).unwrap_err().is_header_crc());

        sim.transfer(&[0; HEADER_LEN], &mut rx).await.unwrap();
        assert!(validate_header(&rx).is_ok());
        assert_eq!(handle.transfer_count(), 4);
    }

    #[tokio::test]
    async fn attributes_round_trip_through_selectors() {
        let mut sim = module();
        let handle = sim.handle();
        let mut set = Vec::new();
        set.extend_from_slice(&0u16.to_le_bytes());
        set.extend_from_slice(&8u16.to_le_bytes());
        send(&mut sim, Opcode::AttributeSet, 5, &set).await;
        assert_eq!(handle.averaging(), 8);

        send(&mut sim, Opcode::AttributeGet, 6, &1u16.to_le_bytes()).await;
        assert_eq!(read_payload(&mut sim).await, 8u16.to_le_bytes().to_vec());

        send(&mut sim, Opcode::AttributeClear, 7, &0u16.to_le_bytes()).await;
        assert_eq!(handle.averaging(), DEFAULT_AVERAGING);
    }

    #[tokio::test]
    async fn unknown_opcode_is_rejected() {
        let mut sim = module();
        let header = Header {
            opcode: 0x55,
            ..Header::new(0, 9)
        };
        let tx = encode_frame(&header, &[]).unwrap();
        sim.transfer(&tx, &mut [0u8; HEADER_LEN]).await.unwrap();
        assert_eq!(poll(&mut sim).await.result, codes::UNKNOWN_OPCODE);
    }
}
