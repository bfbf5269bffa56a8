//! CTAPHID, the USB HID framing authenticators speak.
//!
//! https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#usb

pub mod packet;

#[cfg(target_os = "linux")]
mod device;

#[cfg(target_os = "linux")]
pub use device::{HidAuthenticator, HidTransport};
