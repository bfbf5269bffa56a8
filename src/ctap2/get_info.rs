use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use minicbor::data::Type;
use minicbor::Decoder;
use uuid::Uuid;

use crate::error::ProtocolViolation;

pub const VERSION_U2F_V2: &str = "U2F_V2";
pub const VERSION_FIDO_2_0: &str = "FIDO_2_0";
pub const VERSION_FIDO_2_1_PRE: &str = "FIDO_2_1_PRE";
pub const VERSION_FIDO_2_1: &str = "FIDO_2_1";

const RECOGNIZED_VERSIONS: [&str; 4] = [
    VERSION_U2F_V2,
    VERSION_FIDO_2_0,
    VERSION_FIDO_2_1_PRE,
    VERSION_FIDO_2_1,
];

const AAGUID_LEN: usize = 16;

// authenticatorGetInfo response keys
const KEY_VERSIONS: u64 = 0x01;
const KEY_EXTENSIONS: u64 = 0x02;
const KEY_AAGUID: u64 = 0x03;
const KEY_OPTIONS: u64 = 0x04;
const KEY_MAX_MSG_SIZE: u64 = 0x05;
const KEY_PIN_UV_AUTH_PROTOCOLS: u64 = 0x06;
const KEY_TRANSPORTS: u64 = 0x09;
const KEY_FIRMWARE_VERSION: u64 = 0x0e;

/// Authenticator model identifier.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Aaguid(Uuid);

impl Aaguid {
    pub fn from_bytes(bytes: &[u8]) -> Result<Aaguid, ProtocolViolation> {
        let raw: [u8; AAGUID_LEN] = bytes
            .try_into()
            .map_err(|_| ProtocolViolation::AaguidLength(bytes.len()))?;
        Ok(Aaguid(Uuid::from_bytes(raw)))
    }

    pub fn as_bytes(&self) -> &[u8; AAGUID_LEN] {
        self.0.as_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for Aaguid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for Aaguid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aaguid({})", self.0.hyphenated())
    }
}

/// Decoded authenticatorGetInfo response.
///
/// https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#authenticatorGetInfo
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatorInfo {
    pub versions: BTreeSet<String>,
    pub extensions: BTreeSet<String>,
    pub aaguid: Aaguid,
    pub options: BTreeMap<String, bool>,
    pub max_msg_size: Option<u64>,
    pub pin_uv_auth_protocols: Option<Vec<u64>>,
    pub transports: Option<Vec<String>>,
    pub firmware_version: Option<u64>,
}

impl AuthenticatorInfo {
    /// Decodes the CBOR map following the status byte. Keys this harness does not know are
    /// skipped whatever their type.
    pub fn decode(data: &[u8]) -> Result<AuthenticatorInfo, ProtocolViolation> {
        let mut d = Decoder::new(data);

        let mut versions = None;
        let mut extensions = BTreeSet::new();
        let mut aaguid = None;
        let mut options = BTreeMap::new();
        let mut max_msg_size = None;
        let mut pin_uv_auth_protocols = None;
        let mut transports = None;
        let mut firmware_version = None;

        let entries = definite(d.map()?, "response map")?;
        for _ in 0..entries {
            let key = match d.datatype()? {
                Type::U8 | Type::U16 | Type::U32 | Type::U64 => d.u64()?,
                _ => {
                    d.skip()?;
                    d.skip()?;
                    continue;
                }
            };
            match key {
                KEY_VERSIONS => versions = Some(decode_strings(&mut d)?.into_iter().collect()),
                KEY_EXTENSIONS => extensions = decode_strings(&mut d)?.into_iter().collect(),
                KEY_AAGUID => aaguid = Some(Aaguid::from_bytes(d.bytes()?)?),
                KEY_OPTIONS => options = decode_options(&mut d)?,
                KEY_MAX_MSG_SIZE => max_msg_size = Some(d.u64()?),
                KEY_PIN_UV_AUTH_PROTOCOLS => {
                    pin_uv_auth_protocols = Some(
                        d.array_iter::<u64>()?
                            .collect::<Result<Vec<_>, _>>()?,
                    )
                }
                KEY_TRANSPORTS => transports = Some(decode_strings(&mut d)?),
                KEY_FIRMWARE_VERSION => firmware_version = Some(d.u64()?),
                _ => d.skip()?,
            }
        }

        Ok(AuthenticatorInfo {
            versions: versions.ok_or(ProtocolViolation::MissingField("versions"))?,
            extensions,
            aaguid: aaguid.ok_or(ProtocolViolation::MissingField("aaguid"))?,
            options,
            max_msg_size,
            pin_uv_auth_protocols,
            transports,
            firmware_version,
        })
    }

    pub fn supports_fido2(&self) -> bool {
        self.versions.contains(VERSION_FIDO_2_0)
    }

    pub fn supports_u2f(&self) -> bool {
        self.versions.contains(VERSION_U2F_V2)
    }

    pub fn recognized_versions(&self) -> impl Iterator<Item = &str> {
        self.versions
            .iter()
            .map(String::as_str)
            .filter(|version| RECOGNIZED_VERSIONS.contains(version))
    }

    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.get(name).copied()
    }
}

fn definite(len: Option<u64>, what: &str) -> Result<u64, ProtocolViolation> {
    len.ok_or_else(|| {
        ProtocolViolation::Cbor(format!("indefinite length {} is not canonical", what))
    })
}

fn decode_strings(d: &mut Decoder) -> Result<Vec<String>, ProtocolViolation> {
    let mut strings = Vec::new();
    for item in d.array_iter::<&str>()? {
        strings.push(String::from(item?));
    }
    Ok(strings)
}

fn decode_options(d: &mut Decoder) -> Result<BTreeMap<String, bool>, ProtocolViolation> {
    let mut options = BTreeMap::new();
    let entries = definite(d.map()?, "options map")?;
    for _ in 0..entries {
        let name = String::from(d.str()?);
        if d.datatype()? != Type::Bool {
            return Err(ProtocolViolation::Cbor(format!(
                "option {} is not a boolean",
                name
            )));
        }
        options.insert(name, d.bool()?);
    }
    Ok(options)
}
