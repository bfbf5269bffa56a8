//! CTAP2 capability discovery. Only authenticatorGetInfo is issued.

mod get_info;

use tracing::{debug, info, warn};

pub use get_info::{
    Aaguid, AuthenticatorInfo, VERSION_FIDO_2_0, VERSION_FIDO_2_1, VERSION_FIDO_2_1_PRE,
    VERSION_U2F_V2,
};

use crate::error::{Error, ProtocolViolation};
use crate::transport::{CommandType, Device};

const AUTHENTICATOR_GET_INFO: u8 = 0x04;
const CTAP2_OK: u8 = 0x00;

const PIN_UV_AUTH_PROTOCOL_ONE: u64 = 1;
const PIN_UV_AUTH_PROTOCOL_TWO: u64 = 2;

pub struct Ctap2<'a, D: Device + ?Sized> {
    device: &'a mut D,
}

impl<'a, D: Device + ?Sized> Ctap2<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        Ctap2 { device }
    }

    pub fn get_info(&mut self) -> Result<AuthenticatorInfo, Error> {
        debug!("GetInfo request");
        let response = self
            .device
            .transact(CommandType::Cbor, &[AUTHENTICATOR_GET_INFO])?;

        let (&status, data) = response
            .split_first()
            .ok_or(ProtocolViolation::ResponseTooShort {
                expected: 1,
                actual: 0,
            })?;
        if status != CTAP2_OK {
            return Err(ProtocolViolation::Ctap2Status(status).into());
        }

        let info = AuthenticatorInfo::decode(data)?;
        if info.recognized_versions().next().is_none() {
            return Err(
                ProtocolViolation::NoRecognizedVersion(info.versions.iter().cloned().collect())
                    .into(),
            );
        }
        info!(
            versions = ?info.versions,
            aaguid = %info.aaguid,
            extensions = ?info.extensions,
            "Authenticator info"
        );
        Ok(info)
    }
}

/// Cross-field consistency of a FIDO2 authenticator's advertised capabilities.
pub fn check_capabilities(
    info: &AuthenticatorInfo,
    ctap1_registered: bool,
) -> Result<(), ProtocolViolation> {
    if info.aaguid.is_zero() {
        warn!("AAGUID is all zeros, the authenticator model cannot be identified");
    }

    if let Some(protocols) = &info.pin_uv_auth_protocols {
        if protocols.is_empty() {
            return Err(ProtocolViolation::Capability(String::from(
                "pinUvAuthProtocols is present but empty",
            )));
        }
        if let Some(&unsupported) = protocols
            .iter()
            .find(|&&p| p != PIN_UV_AUTH_PROTOCOL_ONE && p != PIN_UV_AUTH_PROTOCOL_TWO)
        {
            return Err(ProtocolViolation::PinUvAuthProtocol(unsupported));
        }
    }

    if info.option("clientPin").is_some() && info.pin_uv_auth_protocols.is_none() {
        return Err(ProtocolViolation::Capability(String::from(
            "clientPin option is reported without pinUvAuthProtocols",
        )));
    }

    if ctap1_registered && !info.supports_u2f() {
        return Err(ProtocolViolation::Capability(String::from(
            "device answers U2F Register but does not list U2F_V2",
        )));
    }

    Ok(())
}
