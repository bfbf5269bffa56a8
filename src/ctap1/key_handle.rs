use std::fmt::{self, Debug};

use crate::ctap1::constants::MAX_KEY_HANDLE_LEN;
use crate::error::ProtocolViolation;

/// Opaque, device-issued credential identifier. Replayed byte for byte, never rebuilt.
#[derive(Clone, Eq, PartialEq)]
pub struct KeyHandle(Vec<u8>);

impl KeyHandle {
    pub fn from_bytes(bytes: &[u8]) -> Result<KeyHandle, ProtocolViolation> {
        if bytes.is_empty() {
            return Err(ProtocolViolation::EmptyKeyHandle);
        }
        // The length travels in a single byte, so anything longer cannot be encoded.
        if bytes.len() > MAX_KEY_HANDLE_LEN {
            return Err(ProtocolViolation::KeyHandleLength {
                declared: bytes.len(),
                available: MAX_KEY_HANDLE_LEN,
            });
        }
        Ok(KeyHandle(bytes.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of this handle with one bit inverted, used to check the device tells its own
    /// handles apart from forgeries.
    pub fn with_bit_flipped(&self, bit: usize) -> KeyHandle {
        let mut bytes = self.0.clone();
        let index = (bit / 8) % bytes.len();
        bytes[index] ^= 1 << (bit % 8);
        KeyHandle(bytes)
    }
}

impl AsRef<[u8]> for KeyHandle {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "KeyHandle({})", hex::encode(&self.0))
    }
}
