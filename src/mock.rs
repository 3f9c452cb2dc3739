//! Simulated gate controller.
//!
//! Provides an in-process stand-in for the USB-serial board so the whole
//! pipeline runs without hardware (`sortgate --mock ...`) and so connection
//! scenarios can be scripted in tests.
//!
//! # Available Mocks
//!
//! - [`MockPortOpener`]: a bench of simulated device paths. Implements both
//!   [`PortOpener`] and [`PortScanner`]; only plugged-in devices are listed.
//! - [`MockDevice`]: handle to one simulated board. Records every byte
//!   written and can be unplugged, made busy, or made to fail/hang writes.
//!
//! # Example
//!
//! ```rust,ignore
//! let bench = MockPortOpener::new();
//! let board = bench.attach("/dev/cu.usbserial-10");
//! // ... run the controller against `bench` ...
//! assert_eq!(board.commands(), b"30");
//! ```

use crate::command::PROBE_BYTE;
use crate::discovery::PortScanner;
use crate::error::LinkError;
use crate::link::{DynSerial, LinkSettings, PortOpener};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Default path used by `--mock`.
pub const MOCK_PORT_PATH: &str = "/dev/cu.usbserial-mock";

#[derive(Debug, Default)]
struct DeviceState {
    plugged: bool,
    busy: bool,
    hang_writes: bool,
    failing_writes: u32,
    // bumped on unplug so handles from an earlier session go stale
    generation: u64,
    opens: usize,
    written: Vec<u8>,
}

#[derive(Debug, Default)]
struct Bench {
    devices: Vec<(String, Arc<Mutex<DeviceState>>)>,
    open_attempts: usize,
}

/// Bench of simulated serial devices.
#[derive(Debug, Clone, Default)]
pub struct MockPortOpener {
    bench: Arc<Mutex<Bench>>,
}

impl MockPortOpener {
    /// Empty bench: no device present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a device in at `path` (re-plugging an existing one keeps its log).
    pub fn attach(&self, path: &str) -> MockDevice {
        let mut bench = self.bench.lock();
        let state = match bench.devices.iter().find(|(p, _)| p == path) {
            Some((_, state)) => state.clone(),
            None => {
                let state = Arc::new(Mutex::new(DeviceState::default()));
                bench.devices.push((path.to_string(), state.clone()));
                state
            }
        };
        state.lock().plugged = true;
        MockDevice {
            path: path.to_string(),
            state,
        }
    }

    /// Handle to a device previously attached at `path`.
    pub fn device(&self, path: &str) -> Option<MockDevice> {
        self.bench
            .lock()
            .devices
            .iter()
            .find(|(p, _)| p == path)
            .map(|(p, state)| MockDevice {
                path: p.clone(),
                state: state.clone(),
            })
    }

    /// Total `open()` calls across all paths, successful or not.
    pub fn open_attempts(&self) -> usize {
        self.bench.lock().open_attempts
    }
}

#[async_trait]
impl PortOpener for MockPortOpener {
    async fn open(&self, path: &str, _settings: &LinkSettings) -> Result<DynSerial, LinkError> {
        let state = {
            let mut bench = self.bench.lock();
            bench.open_attempts += 1;
            bench
                .devices
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, state)| state.clone())
        };

        let open_error = |reason: &str| LinkError::Open {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let Some(state) = state else {
            return Err(open_error("No such file or directory"));
        };

        let generation = {
            let mut device = state.lock();
            if !device.plugged {
                return Err(open_error("No such file or directory"));
            }
            if device.busy {
                return Err(open_error("Resource busy"));
            }
            device.opens += 1;
            device.generation
        };

        Ok(Box::new(MockLink { state, generation }))
    }
}

impl PortScanner for MockPortOpener {
    fn list_candidate_ports(&self) -> Vec<String> {
        self.bench
            .lock()
            .devices
            .iter()
            .filter(|(_, state)| state.lock().plugged)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Handle to one simulated board.
#[derive(Debug, Clone)]
pub struct MockDevice {
    path: String,
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// Device path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Pull the cable: open handles go stale and the path disappears.
    pub fn unplug(&self) {
        let mut state = self.state.lock();
        state.plugged = false;
        state.generation += 1;
    }

    /// Plug the cable back in at the same path.
    pub fn replug(&self) {
        self.state.lock().plugged = true;
    }

    /// Make `open()` fail as if another process held the port.
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Fail the next `n` writes with an I/O error.
    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().failing_writes = n;
    }

    /// Make writes and close never complete (until cleared).
    pub fn set_hang_writes(&self, hang: bool) {
        self.state.lock().hang_writes = hang;
    }

    /// Every byte written, probes included.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Command bytes only (liveness probes filtered out).
    pub fn commands(&self) -> Vec<u8> {
        self.state
            .lock()
            .written
            .iter()
            .copied()
            .filter(|b| *b != PROBE_BYTE)
            .collect()
    }

    /// Number of liveness probes received.
    pub fn probe_count(&self) -> usize {
        self.state
            .lock()
            .written
            .iter()
            .filter(|b| **b == PROBE_BYTE)
            .count()
    }

    /// Successful opens of this device.
    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Forget recorded bytes.
    pub fn clear_log(&self) {
        self.state.lock().written.clear();
    }
}

/// Open session on a simulated board.
struct MockLink {
    state: Arc<Mutex<DeviceState>>,
    generation: u64,
}

impl MockLink {
    fn check_alive(&self, device: &DeviceState) -> io::Result<()> {
        if !device.plugged || device.generation != self.generation {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device not configured",
            ));
        }
        Ok(())
    }
}

impl AsyncWrite for MockLink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut device = self.state.lock();
        if let Err(e) = self.check_alive(&device) {
            return Poll::Ready(Err(e));
        }
        if device.hang_writes {
            // never woken; the caller's write timeout ends the wait
            return Poll::Pending;
        }
        if device.failing_writes > 0 {
            device.failing_writes -= 1;
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        device.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let device = self.state.lock();
        Poll::Ready(self.check_alive(&device))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.state.lock().hang_writes {
            return Poll::Pending;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for MockLink {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // The firmware never answers.
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn records_written_bytes() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");

        let mut port = bench
            .open("/dev/ttyUSB0", &LinkSettings::default())
            .await
            .ok()
            .unwrap();
        port.write_all(&[PROBE_BYTE, b'1', b'0']).await.unwrap();

        assert_eq!(board.written(), vec![0, b'1', b'0']);
        assert_eq!(board.commands(), b"10".to_vec());
        assert_eq!(board.probe_count(), 1);
        assert_eq!(board.open_count(), 1);
        assert_eq!(bench.open_attempts(), 1);
    }

    #[tokio::test]
    async fn unknown_and_busy_paths_fail_to_open() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        board.set_busy(true);

        assert!(bench.open("/dev/ttyUSB9", &LinkSettings::default()).await.is_err());
        assert!(bench.open("/dev/ttyUSB0", &LinkSettings::default()).await.is_err());
        assert_eq!(bench.open_attempts(), 2);
        assert_eq!(board.open_count(), 0);
    }

    #[tokio::test]
    async fn unplug_breaks_open_handles_and_hides_path() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let mut port = bench
            .open("/dev/ttyUSB0", &LinkSettings::default())
            .await
            .ok()
            .unwrap();

        board.unplug();
        assert!(port.write_all(b"1").await.is_err());
        assert!(bench.list_candidate_ports().is_empty());

        // replugging does not revive the stale handle
        board.replug();
        assert!(port.write_all(b"1").await.is_err());
        assert_eq!(bench.list_candidate_ports(), vec!["/dev/ttyUSB0".to_string()]);
    }

    #[tokio::test]
    async fn scripted_write_failures_are_consumed() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let mut port = bench
            .open("/dev/ttyUSB0", &LinkSettings::default())
            .await
            .ok()
            .unwrap();

        board.fail_next_writes(1);
        assert!(port.write_all(b"1").await.is_err());
        assert!(port.write_all(b"1").await.is_ok());
        assert_eq!(board.commands(), b"1".to_vec());
    }
}
