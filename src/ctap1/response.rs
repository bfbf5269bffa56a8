use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::ctap1::attestation::AttestationCertificate;
use crate::ctap1::constants::*;
use crate::ctap1::key_handle::KeyHandle;
use crate::error::ProtocolViolation;

pub type Counter = u32;

/// User public key [65 bytes]. Raw ANSI X9.62 formatted uncompressed P-256 point,
/// [0x04, X (32 bytes), Y (32 bytes)].
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey, ProtocolViolation> {
        let raw: [u8; PUBLIC_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ProtocolViolation::PublicKeyLength(bytes.len()))?;
        if raw[0] != EC_POINT_FORMAT_UNCOMPRESSED {
            return Err(ProtocolViolation::PublicKeyFormat(raw[0]));
        }
        Ok(PublicKey(raw))
    }

    pub fn to_raw(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// DER encoded ECDSA signature, opaque to the harness.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    fn from_bytes(bytes: &[u8]) -> Result<Signature, ProtocolViolation> {
        if bytes.is_empty() {
            return Err(ProtocolViolation::EmptySignature);
        }
        Ok(Signature(bytes.to_vec()))
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResult {
    pub user_public_key: PublicKey,
    pub key_handle: KeyHandle,
    pub attestation_certificate: AttestationCertificate,
    pub signature: Signature,
}

impl RegistrationResult {
    pub(crate) fn decode(data: &[u8]) -> Result<RegistrationResult, ProtocolViolation> {
        // reserved byte [1 byte], which for legacy reasons has the value 0x05.
        let (&reserved, rest) = data
            .split_first()
            .ok_or(ProtocolViolation::ResponseTooShort {
                expected: 1,
                actual: 0,
            })?;
        if reserved != REGISTER_RESERVED_BYTE {
            return Err(ProtocolViolation::ReservedByte(reserved));
        }

        // user public key [65 bytes].
        if rest.len() < PUBLIC_KEY_LEN {
            return Err(ProtocolViolation::PublicKeyLength(rest.len()));
        }
        let (public_key_bytes, rest) = rest.split_at(PUBLIC_KEY_LEN);
        let user_public_key = PublicKey::from_bytes(public_key_bytes)?;

        // key handle length byte [1 byte] (range 0-255).
        let (&key_handle_len, rest) =
            rest.split_first()
                .ok_or(ProtocolViolation::ResponseTooShort {
                    expected: 1 + PUBLIC_KEY_LEN + 1,
                    actual: data.len(),
                })?;
        let key_handle_len = key_handle_len as usize;
        if key_handle_len == 0 {
            return Err(ProtocolViolation::EmptyKeyHandle);
        }
        if rest.len() < key_handle_len {
            return Err(ProtocolViolation::KeyHandleLength {
                declared: key_handle_len,
                available: rest.len(),
            });
        }

        // A key handle [length specified in previous field].
        let (key_handle_bytes, rest) = rest.split_at(key_handle_len);
        let key_handle = KeyHandle::from_bytes(key_handle_bytes)?;

        // An attestation certificate [variable length], X.509 DER.
        let (attestation_certificate, rest) = AttestationCertificate::split_from(rest)?;

        // A signature [variable length, 71-73 bytes] over
        // (0x00, application, challenge, key handle, user public key).
        let signature = Signature::from_bytes(rest)?;

        Ok(RegistrationResult {
            user_public_key,
            key_handle,
            attestation_certificate,
            signature,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    pub user_present: bool,
    pub counter: Counter,
    pub signature: Signature,
}

impl AuthenticationResult {
    pub(crate) fn decode(data: &[u8]) -> Result<AuthenticationResult, ProtocolViolation> {
        if data.len() < AUTHENTICATE_PREFIX_LEN {
            return Err(ProtocolViolation::ResponseTooShort {
                expected: AUTHENTICATE_PREFIX_LEN,
                actual: data.len(),
            });
        }
        let mut reader = Cursor::new(data);
        let too_short = |_| ProtocolViolation::ResponseTooShort {
            expected: AUTHENTICATE_PREFIX_LEN,
            actual: data.len(),
        };

        // A user presence byte [1 byte]. Bit 0 set means user presence was verified.
        let user_presence = reader.read_u8().map_err(too_short)?;

        // A counter [4 bytes], big-endian.
        let counter = reader.read_u32::<BigEndian>().map_err(too_short)?;

        // A signature [variable length] over
        // (application, user presence byte, counter, challenge).
        let mut signature_bytes = Vec::new();
        reader.read_to_end(&mut signature_bytes).map_err(too_short)?;
        let signature = Signature::from_bytes(&signature_bytes)?;

        // Authenticate is always sent in enforce mode, so presence must have been tested.
        if user_presence & AUTH_FLAG_TUP == 0 {
            return Err(ProtocolViolation::UserPresenceNotAsserted(user_presence));
        }

        Ok(AuthenticationResult {
            user_present: true,
            counter,
            signature,
        })
    }
}

/// Splits the trailing status word [2 bytes] off a response APDU.
pub(crate) fn split_status_word(response: &[u8]) -> Result<(&[u8], u16), ProtocolViolation> {
    if response.len() < 2 {
        return Err(ProtocolViolation::ResponseTooShort {
            expected: 2,
            actual: response.len(),
        });
    }
    let (data, status) = response.split_at(response.len() - 2);
    Ok((data, u16::from_be_bytes([status[0], status[1]])))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn public_key() -> Vec<u8> {
        let mut key = vec![EC_POINT_FORMAT_UNCOMPRESSED];
        key.extend_from_slice(&[0x11; 64]);
        key
    }

    fn registration_bytes(public_key: &[u8], key_handle: &[u8], signature: &[u8]) -> Vec<u8> {
        let mut bytes = vec![REGISTER_RESERVED_BYTE];
        bytes.extend_from_slice(public_key);
        bytes.push(key_handle.len() as u8);
        bytes.extend_from_slice(key_handle);
        bytes.extend_from_slice(&[0x30, 0x03, 0x02, 0x01, 0x00]);
        bytes.extend_from_slice(signature);
        bytes
    }

    #[test]
    fn decode_registration() {
        let bytes = registration_bytes(&public_key(), &[0x22; 64], &[0x30, 0x45, 0x01]);

        let registration = RegistrationResult::decode(&bytes).unwrap();

        assert_eq!(registration.user_public_key.to_raw(), &public_key()[..]);
        assert_eq!(registration.key_handle.as_ref(), &[0x22; 64][..]);
        assert_eq!(
            registration.attestation_certificate.to_der(),
            &[0x30, 0x03, 0x02, 0x01, 0x00]
        );
        assert_eq!(registration.signature.as_ref(), &[0x30, 0x45, 0x01]);
    }

    #[test]
    fn decode_registration_with_compressed_point_marker_errors() {
        let mut key = public_key();
        key[0] = 0x02;
        let bytes = registration_bytes(&key, &[0x22; 16], &[0x01]);

        assert_matches!(
            RegistrationResult::decode(&bytes),
            Err(ProtocolViolation::PublicKeyFormat(0x02))
        );
    }

    #[test]
    fn decode_registration_with_short_public_key_errors() {
        let mut bytes = vec![REGISTER_RESERVED_BYTE];
        bytes.extend_from_slice(&public_key()[..64]);

        assert_matches!(
            RegistrationResult::decode(&bytes),
            Err(ProtocolViolation::PublicKeyLength(64))
        );
    }

    #[test]
    fn decode_registration_with_wrong_reserved_byte_errors() {
        let mut bytes = registration_bytes(&public_key(), &[0x22; 16], &[0x01]);
        bytes[0] = 0x00;

        assert_matches!(
            RegistrationResult::decode(&bytes),
            Err(ProtocolViolation::ReservedByte(0x00))
        );
    }

    #[test]
    fn decode_registration_with_empty_key_handle_errors() {
        let bytes = registration_bytes(&public_key(), &[], &[0x01]);

        assert_matches!(
            RegistrationResult::decode(&bytes),
            Err(ProtocolViolation::EmptyKeyHandle)
        );
    }

    #[test]
    fn decode_registration_with_overlong_key_handle_length_errors() {
        let mut bytes = vec![REGISTER_RESERVED_BYTE];
        bytes.extend_from_slice(&public_key());
        bytes.push(200);
        bytes.extend_from_slice(&[0x22; 10]);

        assert_matches!(
            RegistrationResult::decode(&bytes),
            Err(ProtocolViolation::KeyHandleLength {
                declared: 200,
                available: 10
            })
        );
    }

    #[test]
    fn decode_registration_without_signature_errors() {
        let bytes = registration_bytes(&public_key(), &[0x22; 16], &[]);

        assert_matches!(
            RegistrationResult::decode(&bytes),
            Err(ProtocolViolation::EmptySignature)
        );
    }

    #[test]
    fn decode_authentication() {
        let bytes = [0x01, 0x00, 0x00, 0x01, 0x02, 0x30, 0x44];

        let authentication = AuthenticationResult::decode(&bytes).unwrap();

        assert!(authentication.user_present);
        assert_eq!(authentication.counter, 258);
        assert_eq!(authentication.signature.as_ref(), &[0x30, 0x44]);
    }

    #[test]
    fn decode_authentication_shorter_than_prefix_errors() {
        assert_matches!(
            AuthenticationResult::decode(&[0x01, 0x00, 0x00, 0x01]),
            Err(ProtocolViolation::ResponseTooShort {
                expected: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn decode_authentication_without_signature_errors() {
        assert_matches!(
            AuthenticationResult::decode(&[0x01, 0x00, 0x00, 0x00, 0x01]),
            Err(ProtocolViolation::EmptySignature)
        );
    }

    #[test]
    fn decode_authentication_without_user_presence_errors() {
        assert_matches!(
            AuthenticationResult::decode(&[0x00, 0x00, 0x00, 0x00, 0x01, 0x30]),
            Err(ProtocolViolation::UserPresenceNotAsserted(0x00))
        );
    }

    #[test]
    fn split_status_word_requires_two_bytes() {
        assert_matches!(
            split_status_word(&[0x90]),
            Err(ProtocolViolation::ResponseTooShort { .. })
        );
        assert_eq!(
            split_status_word(&[0xaa, 0x90, 0x00]).unwrap(),
            (&[0xaa][..], 0x9000)
        );
    }
}
