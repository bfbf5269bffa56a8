use std::fmt;

use crate::error::TransportError;

/// An authenticator seen during enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: String,
    pub product: Option<String>,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} at {}",
            self.vendor_id, self.product_id, self.path
        )?;
        if let Some(product) = &self.product {
            write!(f, " ({})", product)?;
        }
        Ok(())
    }
}

/// Encapsulation a payload travels in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    /// Encapsulated CTAP1/U2F APDU
    Msg,
    /// Encapsulated CTAP2 CBOR command
    Cbor,
}

/// Host side of an authenticator transport.
///
/// Framing, channel allocation and the per-transaction timeout all live behind this
/// trait; the protocol engines only see whole request and response payloads.
pub trait Transport {
    type Device: Device;

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// The returned device is released when dropped.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Self::Device, TransportError>;
}

/// One open authenticator. At most one transaction is outstanding at a time, enforced by
/// the `&mut self` receiver.
pub trait Device {
    fn transact(&mut self, command: CommandType, payload: &[u8])
        -> Result<Vec<u8>, TransportError>;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn transact(
        &mut self,
        command: CommandType,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        (**self).transact(command, payload)
    }
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn transact(
        &mut self,
        command: CommandType,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        Box::as_mut(self).transact(command, payload)
    }
}
