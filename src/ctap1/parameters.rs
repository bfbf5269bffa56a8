use std::fmt;

use crate::ctap1::constants::PARAMETER_LEN;
use crate::error::ParameterLengthError;

fn fixed_length(
    name: &'static str,
    slice: &[u8],
) -> Result<[u8; PARAMETER_LEN], ParameterLengthError> {
    slice.try_into().map_err(|_| ParameterLengthError {
        name,
        expected: PARAMETER_LEN,
        actual: slice.len(),
    })
}

/// Challenge parameter [32 bytes], the nonce the device must sign over.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Challenge(pub(crate) [u8; PARAMETER_LEN]);

impl Challenge {
    pub fn new(bytes: [u8; PARAMETER_LEN]) -> Challenge {
        Challenge(bytes)
    }

    pub fn random() -> Challenge {
        Challenge(rand::random())
    }

    pub fn from_slice(slice: &[u8]) -> Result<Challenge, ParameterLengthError> {
        fixed_length("Challenge", slice).map(Challenge)
    }
}

impl AsRef<[u8]> for Challenge {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", hex::encode(self.0))
    }
}

/// Application parameter [32 bytes], binds a credential to the relying party that asked
/// for it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppParameter(pub(crate) [u8; PARAMETER_LEN]);

impl AppParameter {
    pub fn new(bytes: [u8; PARAMETER_LEN]) -> AppParameter {
        AppParameter(bytes)
    }

    pub fn random() -> AppParameter {
        AppParameter(rand::random())
    }

    pub fn from_slice(slice: &[u8]) -> Result<AppParameter, ParameterLengthError> {
        fixed_length("AppParameter", slice).map(AppParameter)
    }
}

impl AsRef<[u8]> for AppParameter {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Debug for AppParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppParameter(0x{})", hex::encode_upper(self.0))
    }
}
