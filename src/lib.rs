//! # Rust INDI Core Library
//!
//! This crate implements a device-control property protocol: drivers expose typed,
//! named properties (numbers, text, switches, lights and binary blobs) to clients
//! and to each other, and every change travels as a textual wire message. Large
//! binary payloads can skip the text path entirely and travel as shared-memory
//! descriptors over a local socket.
//!
//! ## Crate Structure
//!
//! - **`property`**: `PropertyVector`, its members, and their update rules.
//! - **`sexagesimal`** / **`number_format`**: `D:MM:SS` codec and printf-style
//!   number rendering used by Number members.
//! - **`wire`**: rendering of vectors and control messages, the inbound message
//!   decoder, and application of snooped messages to local vectors.
//! - **`transport`**: the `Transport` trait the writer renders through, the
//!   process `Connection` (plain stream or batching socket with descriptor
//!   attachment), and the Unix socket plumbing.
//! - **`driver`**: `DriverIo`, the publishing facade a device driver holds.
//! - **`snoop`** / **`dispatch`**: following other drivers' vectors and routing
//!   inbound messages to a `DeviceHandler`.
//! - **`scheduler`**: cooperative timer queue for periodic driver work.
//! - **`simulator`**: a small simulated device used by the `rust_indi` binary.
//! - **`config`** / **`logging`** / **`error`**: configuration loading, tracing
//!   setup, and the crate error type.

pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod logging;
pub mod number_format;
pub mod property;
pub mod scheduler;
pub mod sexagesimal;
pub mod simulator;
pub mod snoop;
pub mod transport;
pub mod wire;

pub use driver::DriverIo;
pub use error::{AppResult, IndiError};
