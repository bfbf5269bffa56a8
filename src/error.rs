use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure of the exchange itself: the device never produced a complete answer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Malformed framing: {0}")]
    Framing(String),

    #[error("Device reported CTAPHID error {0:#04x}")]
    Device(u8),

    #[error("HID error: {0}")]
    Hid(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A complete response arrived but breaks a structural rule of CTAP1 or CTAP2.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("Response too short, expected at least {expected} bytes but got {actual}")]
    ResponseTooShort { expected: usize, actual: usize },

    #[error("Unexpected reserved byte {0:#04x}, expected 0x05")]
    ReservedByte(u8),

    #[error("Public key must be 65 bytes, got {0}")]
    PublicKeyLength(usize),

    #[error("Public key must start with the uncompressed point marker 0x04, got {0:#04x}")]
    PublicKeyFormat(u8),

    #[error("Key handle is empty")]
    EmptyKeyHandle,

    #[error("Key handle length byte declares {declared} bytes but only {available} remain")]
    KeyHandleLength { declared: usize, available: usize },

    #[error("Invalid attestation certificate: {0}")]
    AttestationCertificate(String),

    #[error("Signature is empty")]
    EmptySignature,

    #[error("User presence bit not set in {0:#04x}")]
    UserPresenceNotAsserted(u8),

    #[error("Device rejected the key handle it issued")]
    KeyHandleRejected,

    #[error("Device accepted a corrupted key handle")]
    CorruptedKeyHandleAccepted,

    #[error("Counter decreased from {previous} to {current}")]
    CounterDecreased { previous: u32, current: u32 },

    #[error("Unexpected status word {0:#06x}")]
    StatusWord(u16),

    #[error("Unexpected version string {0:?}")]
    Version(String),

    #[error("CTAP2 command failed with status {0:#04x}")]
    Ctap2Status(u8),

    #[error("Invalid CBOR: {0}")]
    Cbor(String),

    #[error("GetInfo is missing mandatory field {0}")]
    MissingField(&'static str),

    #[error("AAGUID must be 16 bytes, got {0}")]
    AaguidLength(usize),

    #[error("No recognized protocol version in {0:?}")]
    NoRecognizedVersion(Vec<String>),

    #[error("Unsupported PIN/UV auth protocol {0}")]
    PinUvAuthProtocol(u64),

    #[error("{0}")]
    Capability(String),
}

impl From<minicbor::decode::Error> for ProtocolViolation {
    fn from(err: minicbor::decode::Error) -> Self {
        ProtocolViolation::Cbor(err.to_string())
    }
}

/// Outcome of a failed transaction, kept distinct so the report can tell a flaky
/// link from a non-conformant device.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "TransportError",
            Error::Protocol(_) => "ProtocolViolation",
        }
    }
}

/// Challenges and application parameters are built by the harness, so a wrong length is
/// a bug on this side of the wire rather than a device fault.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{name} must be exactly {expected} bytes, got {actual}")]
pub struct ParameterLengthError {
    pub name: &'static str,
    pub expected: usize,
    pub actual: usize,
}
