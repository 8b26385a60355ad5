//! Transport trait for the SPI link to an HROCM module.
//!
//! The [`Transport`] trait abstracts over the adapter that clocks bytes to
//! and from the module. SPI is full duplex: every exchange shifts out a
//! transmit buffer while shifting in a receive buffer of the same length.
//! The module has no interrupt line, so every observation the host makes is
//! one of these fixed-size exchanges.
//!
//! The protocol engine in `hrocm-device` operates on a `Transport` rather
//! than on a concrete adapter, enabling both real hardware control and
//! deterministic unit testing with `MockTransport` or `SimulatedModule`
//! from the `hrocm-test-harness` crate.

use async_trait::async_trait;

use crate::error::Result;

/// Asynchronous, fixed-length, full-duplex byte exchange with a module.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Acquire the adapter. Failures are reported, not retried.
    async fn open(&mut self) -> Result<()>;

    /// Shift out `tx` and shift in `rx`.
    ///
    /// Callers always pass buffers of equal length. The receive buffer
    /// holds whatever the module had staged when the exchange started; it
    /// does not reflect the effect of `tx`.
    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()>;

    /// Release the adapter.
    ///
    /// After calling `close()`, subsequent `transfer()` calls should return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the adapter is currently open.
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        (**self).transfer(tx, rx).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
