//! Serial link abstractions.
//!
//! # Types
//!
//! - [`SerialPortIO`]: trait alias combining `AsyncRead + AsyncWrite` for serial ports
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`LinkSettings`]: fixed transmission parameters of a device handle
//! - [`PortOpener`]: seam between the connection manager and the OS
//!
//! The real opener uses `tokio-serial`; tests and `--mock` use
//! [`crate::mock::MockPortOpener`].

use crate::config::SerialConfig;
use crate::error::LinkError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port: `tokio_serial::SerialStream`, `tokio::io::DuplexStream`,
/// or the simulated device.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Transmission parameters fixed for the lifetime of a device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// Baud rate (8N1, no flow control)
    pub baud_rate: u32,
    /// Port read timeout
    pub read_timeout: Duration,
    /// Upper bound on one write + flush
    pub write_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::from(&SerialConfig::default())
    }
}

impl From<&SerialConfig> for LinkSettings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// Opens device paths into live serial streams.
#[async_trait]
pub trait PortOpener: Send + Sync {
    /// Open `path` with the given settings.
    async fn open(&self, path: &str, settings: &LinkSettings) -> Result<DynSerial, LinkError>;
}

/// Write `bytes` and flush, bounded by `timeout`.
///
/// Reports [`LinkError::Io`] or [`LinkError::WriteTimeout`]; the caller
/// decides whether that is a probe failure or a write failure.
pub async fn write_with_timeout(
    port: &mut DynSerial,
    bytes: &[u8],
    timeout: Duration,
) -> Result<(), LinkError> {
    let write = async {
        port.write_all(bytes).await?;
        port.flush().await
    };

    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LinkError::Io(e.to_string())),
        Err(_) => Err(LinkError::WriteTimeout(timeout)),
    }
}

/// Opener for real hardware via `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSerialOpener;

#[cfg(feature = "serial")]
#[async_trait]
impl PortOpener for TokioSerialOpener {
    async fn open(&self, path: &str, settings: &LinkSettings) -> Result<DynSerial, LinkError> {
        use tokio::task::spawn_blocking;
        use tokio_serial::SerialPortBuilderExt;

        let path_owned = path.to_string();
        let settings = *settings;

        // Opening can block on some USB-serial drivers.
        let stream = spawn_blocking(move || {
            tokio_serial::new(&path_owned, settings.baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .timeout(settings.read_timeout)
                .open_native_async()
        })
        .await
        .map_err(|e| LinkError::Open {
            path: path.to_string(),
            reason: format!("open task failed: {e}"),
        })?
        .map_err(|e| LinkError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(port = path, baud = settings.baud_rate, "Opened serial port");
        Ok(Box::new(stream))
    }
}

#[cfg(not(feature = "serial"))]
#[async_trait]
impl PortOpener for TokioSerialOpener {
    async fn open(&self, _path: &str, _settings: &LinkSettings) -> Result<DynSerial, LinkError> {
        Err(LinkError::SerialFeatureDisabled)
    }
}
