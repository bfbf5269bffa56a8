use crate::ctap1::constants::*;
use crate::ctap1::key_handle::KeyHandle;
use crate::ctap1::parameters::{AppParameter, Challenge};

/// U2F request message, framed as an ISO 7816-4 extended length APDU.
#[derive(Debug)]
pub enum Request<'a> {
    Register {
        challenge: &'a Challenge,
        application: &'a AppParameter,
    },
    Authenticate {
        challenge: &'a Challenge,
        application: &'a AppParameter,
        key_handle: &'a KeyHandle,
    },
    GetVersion,
}

impl Request<'_> {
    pub fn encode(&self) -> Vec<u8> {
        let (command_code, parameter1, data) = match self {
            Request::Register {
                challenge,
                application,
            } => {
                let mut data = Vec::with_capacity(2 * PARAMETER_LEN);
                // The challenge parameter [32 bytes].
                data.extend_from_slice(challenge.as_ref());
                // The application parameter [32 bytes].
                data.extend_from_slice(application.as_ref());
                (REGISTER_COMMAND_CODE, 0, data)
            }
            Request::Authenticate {
                challenge,
                application,
                key_handle,
            } => {
                let mut data = Vec::with_capacity(2 * PARAMETER_LEN + 1 + key_handle.len());
                // The challenge parameter [32 bytes].
                data.extend_from_slice(challenge.as_ref());
                // The application parameter [32 bytes].
                data.extend_from_slice(application.as_ref());
                // Key handle length byte [1 byte], KeyHandle guarantees it fits.
                data.push(key_handle.len() as u8);
                // Key handle [length specified in previous field].
                data.extend_from_slice(key_handle.as_ref());
                (AUTHENTICATE_COMMAND_CODE, AUTH_ENFORCE, data)
            }
            Request::GetVersion => (VERSION_COMMAND_CODE, 0, Vec::new()),
        };

        let mut bytes = Vec::with_capacity(data.len() + 9);

        // CLA: Reserved to be used by the underlying transport protocol
        bytes.push(0x00);

        // INS: U2F command code
        bytes.push(command_code);

        // P1, P2: Parameter 1 and 2, defined by each command.
        bytes.push(parameter1);
        bytes.push(0x00);

        // Extended Length Encoding always begins with a byte of value 0
        bytes.push(0x00);

        // Lc: Length of the request-data, omitted when there is none
        if !data.is_empty() {
            bytes.extend_from_slice(&(data.len() as u16).to_be_bytes());
            bytes.extend_from_slice(&data);
        }

        // Le: Maximum length of the response data, 0 encodes 65 536
        bytes.extend_from_slice(&[0x00, 0x00]);

        bytes
    }
}
