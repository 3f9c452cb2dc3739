//! # sortgate
//!
//! Device actuation controller for a chemical sorting station. A classifier
//! looks at a photographed container and answers with one of four category
//! labels; this crate turns that label into a single-byte command for the
//! gate microcontroller on a USB-serial link, closes the gate again after a
//! fixed dwell, and reports the result to the inventory service.
//!
//! The serial board is unreliable in the ways USB hardware usually is: it is
//! unplugged, re-enumerated under a new device name, or slow to answer. The
//! connection layer treats all of that as routine and recovers on the next
//! command.
//!
//! ## Crate Structure
//!
//! - **`command`**: categories, the wire byte table and label normalization.
//! - **`discovery`**: candidate serial device paths from platform glob patterns.
//! - **`link`**: the serial I/O seam (`PortOpener`) and the `tokio-serial` opener.
//! - **`connection`**: `ConnectionManager`, the single device handle, liveness
//!   probing and rate-limited reconnect.
//! - **`dispatcher`**: `CommandDispatcher`, bounded write retries and label routing.
//! - **`gate`**: `GateTimer`, the pending auto-close.
//! - **`controller`**: `ActuationController`, the context object that owns all
//!   of the above behind one lock.
//! - **`notify`**: posting results to the inventory HTTP API.
//! - **`trigger`**: `ClassificationTrigger`, one classifier result end to end.
//! - **`service`**: `GateService`, startup, background auto-close and shutdown.
//! - **`mock`**: simulated gate controller for `--mock` and tests.
//! - **`config`**, **`logging`**, **`error`**: the usual application plumbing.

pub mod command;
pub mod config;
pub mod connection;
pub mod controller;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod link;
pub mod logging;
pub mod mock;
pub mod notify;
pub mod service;
pub mod trigger;

pub use command::{Category, Command};
pub use config::SortgateConfig;
pub use controller::{ActuationController, SharedController};
pub use error::{AppResult, LinkError, NotifyError, SortgateError};
pub use service::GateService;
pub use trigger::{ClassificationTrigger, Classifier, ClassifierInput, TriggerReport};
