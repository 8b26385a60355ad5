//! Power and OSNR scan against the simulated module.
//!
//! Builds a session on [`SimulatedModule`], uploads a 50 GHz ITU plan with
//! a matching OSNR plan and a high-resolution section in front of it, runs
//! one scan and prints the per-channel results. Every exchange is recorded
//! to an in-memory binary log, which is then replayed through a second
//! session to show that the capture reproduces the scan offline.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=hrocm_device=debug cargo run -p hrocm --example simulated_scan
//! ```

use std::time::Duration;

use hrocm::transport::{parse_records, ReplayTransport, SharedSink};
use hrocm::{ChannelPlan, HrocmBuilder, NumericKey, OsnrParameters, TextKey, VectorKey};
use hrocm_test_harness::SimulatedModule;
use tracing_subscriber::EnvFilter;

/// 3.125 GHz slices from 191.3125 THz.
const FIRST_SLICE_FREQ: u32 = 1_913_125_000;
const SLICE_WIDTH: u32 = 31_250;
const MAX_SLICES: u16 = 1544;

const CHANNELS: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sink = SharedSink::new();
    let sim = SimulatedModule::with_grid(FIRST_SLICE_FREQ, SLICE_WIDTH, MAX_SLICES);
    let mut device = HrocmBuilder::new()
        .recovery_delay(Duration::ZERO)
        .attempts(100)
        .initial_sequence(1)
        .exchange_log(sink.clone())
        .build_with_transport(Box::new(sim))
        .await?;

    device.ensure_initialized().await?;
    println!(
        "Module {} firmware {}",
        device.get_text(TextKey::SerialNumber).await?,
        device.get_text(TextKey::FirmwareVersion).await?
    );

    let grid = device.grid()?;
    let slices_per_channel = (0.05 / grid.slice_width_thz()).round() as u16;
    let plan = ChannelPlan::itu(&grid, 193.1, 0.05, CHANNELS, Some(&OsnrParameters::default()))?;
    let first = plan.power[0].start;
    let last = first + slices_per_channel * CHANNELS as u16 - 1;
    device
        .set_channel_plan(plan.with_high_resolution_section(first, last))
        .await?;

    device.run_full_scan().await?;
    let centers = device.get_vector(VectorKey::ScanCenter).await?;
    let power = device.get_vector(VectorKey::ScanPower).await?;
    let osnr = device.get_vector(VectorKey::ScanOsnr).await?;
    let peak = device.get_vector(VectorKey::ScanPeakPower).await?;

    let section = centers.len() - osnr.len();
    println!("\n{:>12} {:>9} {:>9} {:>9}", "THz", "dBm", "OSNR dB", "peak dBm");
    for i in 0..osnr.len() {
        let row = section + i;
        println!(
            "{:>12.4} {:>9.1} {:>9.1} {:>9.1}",
            centers[row], power[row], osnr[i], peak[i]
        );
    }
    println!(
        "\nscan #{}, {} high-resolution samples",
        device.get_numeric(NumericKey::ScanNumber).await?,
        section
    );
    println!("link counters: {:?}", device.counters());

    // Replay the capture through a fresh session.
    let records = parse_records(&sink.contents())?;
    println!("\nreplaying {} recorded exchanges", records.len());
    let mut replay = HrocmBuilder::new()
        .recovery_delay(Duration::ZERO)
        .attempts(100)
        .initial_sequence(1)
        .build_with_transport(Box::new(ReplayTransport::new(records).strict()))
        .await?;
    replay.ensure_initialized().await?;
    replay.get_text(TextKey::SerialNumber).await?;
    replay.get_text(TextKey::FirmwareVersion).await?;
    replay
        .set_channel_plan(device.channel_plan().clone())
        .await?;
    replay.run_full_scan().await?;
    let replayed = replay.get_vector(VectorKey::ScanPower).await?;
    println!(
        "replayed power matches: {}",
        replayed == device.get_vector(VectorKey::ScanPower).await?
    );

    Ok(())
}
