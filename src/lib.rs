//! Conformance harness for CTAP1/U2F and CTAP2 hardware authenticators.

pub mod config;
pub mod ctap1;
pub mod ctap2;
pub mod discovery;
pub mod error;
pub mod harness;
pub mod hid;
pub mod notify;
pub mod report;
pub mod transport;

#[cfg(test)]
mod simulated;

pub use config::{Config, ConfigError, DeviceSelector};
pub use discovery::discover;
pub use error::{Error, ProtocolViolation, TransportError};
pub use harness::{Harness, Outcome, SessionReport, Stage, StageReport};
pub use report::Verdict;
pub use transport::{CommandType, Device, DeviceDescriptor, Transport};
