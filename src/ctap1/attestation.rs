use std::fmt;

use crate::error::ProtocolViolation;

const DER_TAG_SEQUENCE: u8 = 0x30;
const DER_LENGTH_LONG_FORM: u8 = 0b1000_0000;

/// Attestation certificate in X.509 DER format, as returned by Register.
///
/// Only its outer framing is checked; trusting the chain is out of scope.
#[derive(Clone, PartialEq, Eq)]
pub struct AttestationCertificate(Vec<u8>);

impl AttestationCertificate {
    pub fn to_der(&self) -> &[u8] {
        &self.0
    }

    /// The certificate is followed by the signature with no length prefix, so the only
    /// way to find the boundary is the certificate's own DER length.
    pub(crate) fn split_from(
        bytes: &[u8],
    ) -> Result<(AttestationCertificate, &[u8]), ProtocolViolation> {
        let invalid =
            |reason: &str| ProtocolViolation::AttestationCertificate(String::from(reason));

        match bytes.first() {
            None => return Err(invalid("missing")),
            Some(&DER_TAG_SEQUENCE) => {}
            Some(tag) => {
                return Err(ProtocolViolation::AttestationCertificate(format!(
                    "expected a DER SEQUENCE, found tag {:#04x}",
                    tag
                )))
            }
        }

        let first_length_byte = *bytes.get(1).ok_or_else(|| invalid("truncated length"))?;
        let (header_len, content_len) = if first_length_byte & DER_LENGTH_LONG_FORM == 0 {
            (2, first_length_byte as usize)
        } else {
            let length_octets = (first_length_byte & !DER_LENGTH_LONG_FORM) as usize;
            if length_octets == 0 {
                return Err(invalid("indefinite length is not allowed in DER"));
            }
            if length_octets > 4 {
                return Err(invalid("length does not fit in 32 bits"));
            }
            let octets = bytes
                .get(2..2 + length_octets)
                .ok_or_else(|| invalid("truncated length"))?;
            let content_len = octets
                .iter()
                .fold(0usize, |acc, octet| (acc << 8) | *octet as usize);
            (2 + length_octets, content_len)
        };

        let total_len = header_len
            .checked_add(content_len)
            .ok_or_else(|| invalid("length overflows the address space"))?;
        if bytes.len() < total_len {
            return Err(ProtocolViolation::AttestationCertificate(format!(
                "declares {} bytes but only {} remain",
                total_len,
                bytes.len()
            )));
        }

        let (certificate, rest) = bytes.split_at(total_len);
        Ok((AttestationCertificate(certificate.to_vec()), rest))
    }
}

impl fmt::Debug for AttestationCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttestationCertificate({} bytes)", self.0.len())
    }
}
