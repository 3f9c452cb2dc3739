//! Serial port discovery.
//!
//! The gate controller is a USB-serial board whose device node is re-created
//! by the OS every time it is replugged, often under a different name
//! (`/dev/cu.usbserial-10`, `/dev/cu.usbserial-110`, ...). Discovery turns a
//! fixed, ordered list of glob patterns into the candidate paths the
//! connection manager tries.

use std::path::Path;

/// Source of candidate device paths.
///
/// Implementations never fail: scan errors mean "no ports".
pub trait PortScanner: Send + Sync {
    /// Candidate paths in priority order.
    fn list_candidate_ports(&self) -> Vec<String>;
}

/// Default patterns for the current platform.
///
/// USB-serial adapters come before generic CDC modems; on macOS the
/// callout (`cu.`) nodes come before the dial-in (`tty.`) nodes.
pub fn default_port_patterns() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec![
            "/dev/cu.usbserial*".into(),
            "/dev/tty.usbserial*".into(),
            "/dev/cu.wchusbserial*".into(), // CH340 clones
            "/dev/cu.usbmodem*".into(),
            "/dev/tty.usbmodem*".into(),
        ]
    } else if cfg!(target_os = "linux") {
        vec!["/dev/ttyUSB*".into(), "/dev/ttyACM*".into()]
    } else {
        vec![]
    }
}

/// Filesystem scanner backed by `glob`.
#[derive(Debug, Clone)]
pub struct GlobScanner {
    patterns: Vec<String>,
}

impl GlobScanner {
    /// Scanner over the platform default patterns.
    pub fn new() -> Self {
        Self::with_patterns(default_port_patterns())
    }

    /// Scanner over explicit patterns, scanned in the given order.
    pub fn with_patterns(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Patterns in scan order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for GlobScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PortScanner for GlobScanner {
    fn list_candidate_ports(&self) -> Vec<String> {
        let mut ports = Vec::new();
        for pattern in &self.patterns {
            for path in glob_paths(pattern) {
                // overlapping patterns can match the same path; it keeps
                // the slot of the first pattern that matched it
                if !ports.contains(&path) {
                    ports.push(path);
                }
            }
        }
        tracing::debug!(count = ports.len(), ?ports, "Scanned for serial ports");
        ports
    }
}

/// Expand one pattern, swallowing pattern and I/O errors.
fn glob_paths(pattern: &str) -> Vec<String> {
    match glob::glob(pattern) {
        Ok(paths) => paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path_to_string(&path)),
                Err(e) => {
                    tracing::debug!(pattern, error = %e, "Skipping unreadable path");
                    None
                }
            })
            .collect(),
        Err(e) => {
            tracing::debug!(pattern, error = %e, "Invalid port pattern");
            Vec::new()
        }
    }
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Fixed candidate list, for tests and the simulated device.
#[derive(Debug, Clone, Default)]
pub struct StaticScanner {
    ports: Vec<String>,
}

impl StaticScanner {
    /// Scanner that always reports `ports`.
    pub fn new<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ports: ports.into_iter().map(Into::into).collect(),
        }
    }
}

impl PortScanner for StaticScanner {
    fn list_candidate_ports(&self) -> Vec<String> {
        self.ports.clone()
    }
}
