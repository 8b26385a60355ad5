//! hrocm-test-harness: Test doubles for the HROCM driver.
//!
//! - [`MockTransport`] -- scripted replies, for byte-exact protocol tests
//! - [`SimulatedModule`] -- a behavioural module model with latencies and
//!   fault injection, for end-to-end tests of the device session

pub mod mock_spi;
pub mod sim_module;

pub use mock_spi::MockTransport;
pub use sim_module::{device_info, SimHandle, SimulatedModule, Spectrum};
