//! Connection manager for the gate controller's serial link.
//!
//! Owns the single [`DeviceHandle`] and everything known about it: whether it
//! is believed live, which path it was opened on, when it last answered a
//! write, and how many connect attempts in a row have failed.
//!
//! Reconnecting is on demand: nothing retries in the background. Every
//! `connect()` either returns immediately (rate limit, live handle) or runs
//! the full sequence:
//!
//! 1. probe the existing handle with a null byte;
//! 2. close it and let the OS release the device;
//! 3. try the last path that worked (fast path);
//! 4. scan for candidates and try each in order.

use crate::command::PROBE_BYTE;
use crate::config::SerialConfig;
use crate::discovery::PortScanner;
use crate::error::LinkError;
use crate::link::{write_with_timeout, DynSerial, LinkSettings, PortOpener};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Whether the link is believed usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No usable handle; the next send reconnects first.
    Disconnected,
    /// A handle exists and passed its last probe or write.
    Connected,
}

/// Timing policy for (re)connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Minimum time between the start of two attempts
    pub min_interval: Duration,
    /// Pause after closing a stale handle
    pub release_delay: Duration,
    /// Pause between open and the first probe
    pub settle_delay: Duration,
    /// Consecutive failures tolerated before [`ConnectionStatus::should_alert`]
    pub alert_threshold: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&SerialConfig::default())
    }
}

impl From<&SerialConfig> for ReconnectPolicy {
    fn from(config: &SerialConfig) -> Self {
        Self {
            min_interval: config.min_reconnect_interval,
            release_delay: config.release_delay,
            settle_delay: config.settle_delay,
            alert_threshold: config.failure_alert_threshold,
        }
    }
}

/// An open serial session bound to one device path.
pub struct DeviceHandle {
    path: String,
    port: DynSerial,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the connection for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Path of the open handle, if any
    pub active_path: Option<String>,
    /// Path used for the fast-path reconnect
    pub remembered_path: Option<String>,
    /// Wall-clock time of the last successful probe or write
    pub last_liveness: Option<DateTime<Utc>>,
    /// Connect attempts that failed in a row
    pub consecutive_failures: u32,
    /// Failures tolerated before alerting
    pub alert_threshold: u32,
}

impl ConnectionStatus {
    /// Whether the failure streak is long enough to show the operator.
    ///
    /// The first few failures stay quiet so a replug blip does not alarm.
    pub fn should_alert(&self) -> bool {
        self.state == ConnectionState::Disconnected
            && self.consecutive_failures > self.alert_threshold
    }

    /// Whether a failed connect should be surfaced at warning level.
    ///
    /// Mirrors the alert threshold from the other side: the first
    /// `alert_threshold` failures are reported, later ones are not repeated.
    pub fn should_report_failure(&self) -> bool {
        self.consecutive_failures <= self.alert_threshold
    }
}

/// Owns the serial connection to the gate controller.
pub struct ConnectionManager {
    opener: Arc<dyn PortOpener>,
    scanner: Arc<dyn PortScanner>,
    settings: LinkSettings,
    policy: ReconnectPolicy,
    handle: Option<DeviceHandle>,
    state: ConnectionState,
    remembered_path: Option<String>,
    last_attempt: Option<Instant>,
    last_liveness: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    attempts_started: u64,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(
        opener: Arc<dyn PortOpener>,
        scanner: Arc<dyn PortScanner>,
        settings: LinkSettings,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            opener,
            scanner,
            settings,
            policy,
            handle: None,
            state: ConnectionState::Disconnected,
            remembered_path: None,
            last_attempt: None,
            last_liveness: None,
            consecutive_failures: 0,
            attempts_started: 0,
        }
    }

    /// Create a manager from the `[serial]` configuration section.
    pub fn from_config(
        opener: Arc<dyn PortOpener>,
        scanner: Arc<dyn PortScanner>,
        config: &SerialConfig,
    ) -> Self {
        Self::new(opener, scanner, config.into(), config.into())
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a send can go straight to the wire.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.handle.is_some()
    }

    /// Connect attempts that got past the rate limit.
    pub fn attempts_started(&self) -> u64 {
        self.attempts_started
    }

    /// Path the next fast-path reconnect will try.
    pub fn remembered_path(&self) -> Option<&str> {
        self.remembered_path.as_deref()
    }

    /// Snapshot for display.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            active_path: self.handle.as_ref().map(|h| h.path.clone()),
            remembered_path: self.remembered_path.clone(),
            last_liveness: self.last_liveness,
            consecutive_failures: self.consecutive_failures,
            alert_threshold: self.policy.alert_threshold,
        }
    }

    /// (Re)establish a live connection.
    ///
    /// Within `min_interval` of the previous attempt this does no I/O and
    /// reports the current state: `Ok` if connected, `RateLimited` if not.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        let now = Instant::now();
        if let Some(last) = self.last_attempt {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.policy.min_interval {
                debug!(?elapsed, "Skipping connection attempt - too soon after last attempt");
                return match self.state {
                    ConnectionState::Connected => Ok(()),
                    ConnectionState::Disconnected => Err(LinkError::RateLimited {
                        elapsed,
                        interval: self.policy.min_interval,
                    }),
                };
            }
        }
        self.last_attempt = Some(now);
        self.attempts_started += 1;

        if let Some(handle) = self.handle.as_mut() {
            match write_with_timeout(&mut handle.port, &[PROBE_BYTE], self.settings.write_timeout)
                .await
            {
                Ok(()) => {
                    debug!(port = %handle.path, "Existing connection is still valid");
                    self.mark_live();
                    return Ok(());
                }
                Err(e) => {
                    warn!(port = %handle.path, error = %e, "Existing connection failed liveness probe");
                }
            }
        }

        if let Some(handle) = self.handle.take() {
            close_handle(handle, self.settings.write_timeout).await;
            sleep(self.policy.release_delay).await;
        }

        let mut tried = 0usize;

        if let Some(path) = self.remembered_path.clone() {
            tried += 1;
            match self.open_candidate(&path).await {
                Ok(handle) => {
                    info!(port = %path, "Reconnected to gate controller");
                    self.adopt(handle);
                    return Ok(());
                }
                Err(e) => debug!(port = %path, error = %e, "Failed to reconnect to last port"),
            }
        }

        let candidates = self.scanner.list_candidate_ports();
        for path in candidates {
            tried += 1;
            match self.open_candidate(&path).await {
                Ok(handle) => {
                    info!(port = %path, "Connected to gate controller");
                    self.adopt(handle);
                    return Ok(());
                }
                Err(e) => debug!(port = %path, error = %e, "Candidate port failed"),
            }
        }

        self.state = ConnectionState::Disconnected;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let err = LinkError::NoDeviceFound { candidates: tried };
        if self.status().should_report_failure() {
            warn!(
                failures = self.consecutive_failures,
                error = %err,
                "Failed to connect to gate controller"
            );
        } else {
            debug!(failures = self.consecutive_failures, "Gate controller still absent");
        }
        Err(err)
    }

    /// Close the handle and forget the remembered path.
    ///
    /// Idempotent. Use for teardown; transient failures go through
    /// [`mark_disconnected`](Self::mark_disconnected) instead.
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!(port = %handle.path, "Serial connection closed");
            close_handle(handle, self.settings.write_timeout).await;
        }
        self.state = ConnectionState::Disconnected;
        self.remembered_path = None;
    }

    /// Lazily invalidate after a write failure.
    ///
    /// The handle and remembered path are kept: the next `connect()` probes
    /// the handle and, if that fails, reopens the same path first.
    pub fn mark_disconnected(&mut self) {
        if self.state == ConnectionState::Connected {
            debug!("Marking gate controller connection as failed");
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Write one byte on the open handle, bounded by the write timeout.
    pub async fn write_byte(&mut self, byte: u8) -> Result<(), LinkError> {
        let handle = self.handle.as_mut().ok_or(LinkError::NotConnected)?;
        write_with_timeout(&mut handle.port, &[byte], self.settings.write_timeout).await?;
        self.last_liveness = Some(Utc::now());
        Ok(())
    }

    // Must not borrow `self`: the port is not `Sync`, and `connect()` has
    // to stay `Send` for the auto-close task.
    fn open_candidate(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<DeviceHandle, LinkError>> + Send + 'static {
        open_and_probe(
            self.opener.clone(),
            path.to_string(),
            self.settings,
            self.policy.settle_delay,
        )
    }

    fn adopt(&mut self, handle: DeviceHandle) {
        self.remembered_path = Some(handle.path.clone());
        self.handle = Some(handle);
        self.mark_live();
    }

    fn mark_live(&mut self) {
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
        self.last_liveness = Some(Utc::now());
    }
}

async fn open_and_probe(
    opener: Arc<dyn PortOpener>,
    path: String,
    settings: LinkSettings,
    settle_delay: Duration,
) -> Result<DeviceHandle, LinkError> {
    let mut port = opener.open(&path, &settings).await?;
    sleep(settle_delay).await;
    if let Err(e) = write_with_timeout(&mut port, &[PROBE_BYTE], settings.write_timeout).await {
        return Err(LinkError::Probe {
            path,
            reason: e.to_string(),
        });
    }
    Ok(DeviceHandle { path, port })
}

/// Close a handle, ignoring errors: the device may already be gone.
async fn close_handle(mut handle: DeviceHandle, limit: Duration) {
    match tokio::time::timeout(limit, handle.port.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(port = %handle.path, error = %e, "Error closing serial port"),
        Err(_) => debug!(port = %handle.path, ?limit, "Timed out closing serial port"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticScanner;
    use crate::mock::MockPortOpener;

    fn manager(bench: &MockPortOpener) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(bench.clone()),
            Arc::new(bench.clone()),
            LinkSettings::default(),
            ReconnectPolicy::default(),
        )
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn connect_future_is_send() {
        let bench = MockPortOpener::new();
        let mut conn = manager(&bench);
        let connect = conn.connect();
        assert_send(&connect);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_to_first_working_candidate() {
        let bench = MockPortOpener::new();
        let busy = bench.attach("/dev/cu.usbserial-10");
        busy.set_busy(true);
        let board = bench.attach("/dev/cu.usbserial-20");
        let mut conn = manager(&bench);

        conn.connect().await.unwrap();

        assert!(conn.is_connected());
        assert_eq!(conn.remembered_path(), Some("/dev/cu.usbserial-20"));
        assert_eq!(board.probe_count(), 1);
        assert_eq!(conn.status().consecutive_failures, 0);
        assert!(conn.status().last_liveness.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn no_device_increments_failure_counter() {
        let bench = MockPortOpener::new();
        let mut conn = manager(&bench);

        let err = conn.connect().await.unwrap_err();
        assert_eq!(err, LinkError::NoDeviceFound { candidates: 0 });
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.status().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_suppresses_second_attempt() {
        let bench = MockPortOpener::new();
        let mut conn = manager(&bench);
        let _ = conn.connect().await;
        let opens_after_first = bench.open_attempts();

        tokio::time::advance(Duration::from_millis(500)).await;
        let err = conn.connect().await.unwrap_err();

        assert!(matches!(err, LinkError::RateLimited { .. }));
        assert_eq!(conn.attempts_started(), 1);
        assert_eq!(bench.open_attempts(), opens_after_first);
        assert_eq!(conn.status().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_call_reports_connected_state() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let mut conn = manager(&bench);
        conn.connect().await.unwrap();

        conn.connect().await.unwrap();
        assert_eq!(conn.attempts_started(), 1);
        assert_eq!(board.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_handle_is_probed_not_reopened() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let mut conn = manager(&bench);
        conn.connect().await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        conn.connect().await.unwrap();

        assert_eq!(board.open_count(), 1);
        assert_eq!(board.probe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_path_reopens_remembered_port_first() {
        let bench = MockPortOpener::new();
        let first = bench.attach("/dev/ttyUSB0");
        let mut conn = manager(&bench);
        conn.connect().await.unwrap();

        // a second adapter appears ahead of ours in scan order, then our
        // board blips
        let scanner = StaticScanner::new(["/dev/ttyUSB1", "/dev/ttyUSB0"]);
        conn.scanner = Arc::new(scanner);
        bench.attach("/dev/ttyUSB1");
        first.unplug();
        first.replug();

        tokio::time::advance(Duration::from_secs(3)).await;
        conn.connect().await.unwrap();

        assert_eq!(conn.status().active_path.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(first.open_count(), 2);
        assert_eq!(bench.device("/dev/ttyUSB1").unwrap().open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_device_falls_through_to_scan_and_fails() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/cu.usbserial-10");
        let mut conn = manager(&bench);
        conn.connect().await.unwrap();

        board.unplug();
        tokio::time::advance(Duration::from_secs(3)).await;
        let err = conn.connect().await.unwrap_err();

        // only the remembered path was tried; the scan found nothing
        assert_eq!(err, LinkError::NoDeviceFound { candidates: 1 });
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.status().active_path, None);
        // the path survives a transient failure
        assert_eq!(conn.remembered_path(), Some("/dev/cu.usbserial-10"));
    }

    #[tokio::test(start_paused = true)]
    async fn release_and_settle_delays_are_observed() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let mut conn = manager(&bench);
        let start = Instant::now();
        conn.connect().await.unwrap();
        // settle only: nothing to release on the first connect
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(250),
            "Expected ~200ms, got {elapsed:?}"
        );

        board.unplug();
        board.replug();
        tokio::time::advance(Duration::from_secs(3)).await;
        let start = Instant::now();
        conn.connect().await.unwrap();
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(700) && elapsed < Duration::from_millis(750),
            "Expected ~700ms (release + settle), got {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_and_forgets_path() {
        let bench = MockPortOpener::new();
        bench.attach("/dev/ttyUSB0");
        let mut conn = manager(&bench);
        conn.connect().await.unwrap();

        conn.disconnect().await;
        conn.disconnect().await;

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.remembered_path(), None);
        assert_eq!(conn.status().active_path, None);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_close_is_bounded_by_write_timeout() {
        let bench = MockPortOpener::new();
        let board = bench.attach("/dev/ttyUSB0");
        let mut conn = manager(&bench);
        conn.connect().await.unwrap();

        board.set_hang_writes(true);
        let start = Instant::now();
        let closed = tokio::time::timeout(Duration::from_secs(10), conn.disconnect()).await;

        assert!(closed.is_ok(), "disconnect hung on a stuck port");
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(conn.status().active_path, None);
    }

    #[tokio::test(start_paused = true)]
    async fn write_without_handle_is_not_connected() {
        let bench = MockPortOpener::new();
        let mut conn = manager(&bench);
        assert_eq!(conn.write_byte(b'1').await, Err(LinkError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn alert_only_after_threshold() {
        let bench = MockPortOpener::new();
        let mut conn = manager(&bench);

        for _ in 0..3 {
            let _ = conn.connect().await;
            assert!(!conn.status().should_alert());
            tokio::time::advance(Duration::from_secs(2)).await;
        }
        let _ = conn.connect().await;
        let status = conn.status();
        assert_eq!(status.consecutive_failures, 4);
        assert!(status.should_alert());
        assert!(!status.should_report_failure());
    }
}
