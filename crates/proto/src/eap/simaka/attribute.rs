//! EAP-SIM/AKA attribute TLVs (RFC 4186/4187 Section 8.1, RFC 5448)
//!
//! Each attribute is coded as a 1-byte type, a 1-byte length in 4-byte
//! words, and a value padded to the word boundary. Length 0 is illegal.
//! Attribute types below 128 are non-skippable: an unrecognized one fails
//! the message. Types 128 and above are skippable and preserved raw.

use crate::ike::{Error, Result};

/// AT_RAND
pub const AT_RAND: u8 = 1;
/// AT_AUTN
pub const AT_AUTN: u8 = 2;
/// AT_RES
pub const AT_RES: u8 = 3;
/// AT_AUTS
pub const AT_AUTS: u8 = 4;
/// AT_PADDING
pub const AT_PADDING: u8 = 6;
/// AT_NONCE_MT
pub const AT_NONCE_MT: u8 = 7;
/// AT_PERMANENT_ID_REQ
pub const AT_PERMANENT_ID_REQ: u8 = 10;
/// AT_MAC
pub const AT_MAC: u8 = 11;
/// AT_NOTIFICATION
pub const AT_NOTIFICATION: u8 = 12;
/// AT_ANY_ID_REQ
pub const AT_ANY_ID_REQ: u8 = 13;
/// AT_IDENTITY
pub const AT_IDENTITY: u8 = 14;
/// AT_VERSION_LIST
pub const AT_VERSION_LIST: u8 = 15;
/// AT_SELECTED_VERSION
pub const AT_SELECTED_VERSION: u8 = 16;
/// AT_FULLAUTH_ID_REQ
pub const AT_FULLAUTH_ID_REQ: u8 = 17;
/// AT_COUNTER
pub const AT_COUNTER: u8 = 19;
/// AT_CLIENT_ERROR_CODE
pub const AT_CLIENT_ERROR_CODE: u8 = 22;
/// AT_KDF_INPUT (RFC 5448)
pub const AT_KDF_INPUT: u8 = 23;
/// AT_KDF (RFC 5448)
pub const AT_KDF: u8 = 24;
/// AT_IV
pub const AT_IV: u8 = 129;
/// AT_ENCR_DATA
pub const AT_ENCR_DATA: u8 = 130;

/// Client error codes for AT_CLIENT_ERROR_CODE
pub mod client_error {
    /// Unable to process the packet
    pub const UNABLE_TO_PROCESS: u16 = 0;
    /// Unsupported version
    pub const UNSUPPORTED_VERSION: u16 = 1;
    /// Insufficient number of challenges
    pub const INSUFFICIENT_CHALLENGES: u16 = 2;
    /// RANDs are not fresh
    pub const RAND_NOT_FRESH: u16 = 3;
}

/// AUTS length in bytes (RFC 4187 Section 10.9)
pub const AUTS_LEN: usize = 14;

/// A decoded EAP-SIM/AKA attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimAkaAttribute {
    /// AT_RAND: one 16-byte RAND for AKA, n for SIM (raw concatenation)
    Rand(Vec<u8>),
    /// AT_AUTN: 16-byte network authentication token
    Autn([u8; 16]),
    /// AT_RES: authentication result, length carried in bits
    Res(Vec<u8>),
    /// AT_AUTS: 14-byte resynchronization parameter
    Auts([u8; AUTS_LEN]),
    /// AT_PADDING carrying the given number of zero value bytes
    Padding(usize),
    /// AT_NONCE_MT: 16-byte nonce (EAP-SIM)
    NonceMt([u8; 16]),
    /// AT_PERMANENT_ID_REQ
    PermanentIdReq,
    /// AT_MAC: 16-byte HMAC over the message
    Mac([u8; 16]),
    /// AT_NOTIFICATION code
    Notification(u16),
    /// AT_ANY_ID_REQ
    AnyIdReq,
    /// AT_IDENTITY value bytes
    Identity(Vec<u8>),
    /// AT_VERSION_LIST (EAP-SIM)
    VersionList(Vec<u16>),
    /// AT_SELECTED_VERSION (EAP-SIM)
    SelectedVersion(u16),
    /// AT_FULLAUTH_ID_REQ
    FullauthIdReq,
    /// AT_COUNTER (fast re-authentication)
    Counter(u16),
    /// AT_CLIENT_ERROR_CODE
    ClientErrorCode(u16),
    /// AT_KDF_INPUT: network name (EAP-AKA')
    KdfInput(Vec<u8>),
    /// AT_KDF: key derivation function number (EAP-AKA')
    Kdf(u16),
    /// AT_IV: 16-byte initialization vector
    Iv([u8; 16]),
    /// AT_ENCR_DATA: encrypted attribute block (kept raw)
    EncrData(Vec<u8>),
    /// Unrecognized skippable attribute (type >= 128), preserved raw
    Skippable {
        /// Attribute type
        attr_type: u8,
        /// Value bytes including any reserved prefix
        value: Vec<u8>,
    },
}

impl SimAkaAttribute {
    /// Attribute type code
    pub fn attr_type(&self) -> u8 {
        match self {
            SimAkaAttribute::Rand(_) => AT_RAND,
            SimAkaAttribute::Autn(_) => AT_AUTN,
            SimAkaAttribute::Res(_) => AT_RES,
            SimAkaAttribute::Auts(_) => AT_AUTS,
            SimAkaAttribute::Padding(_) => AT_PADDING,
            SimAkaAttribute::NonceMt(_) => AT_NONCE_MT,
            SimAkaAttribute::PermanentIdReq => AT_PERMANENT_ID_REQ,
            SimAkaAttribute::Mac(_) => AT_MAC,
            SimAkaAttribute::Notification(_) => AT_NOTIFICATION,
            SimAkaAttribute::AnyIdReq => AT_ANY_ID_REQ,
            SimAkaAttribute::Identity(_) => AT_IDENTITY,
            SimAkaAttribute::VersionList(_) => AT_VERSION_LIST,
            SimAkaAttribute::SelectedVersion(_) => AT_SELECTED_VERSION,
            SimAkaAttribute::FullauthIdReq => AT_FULLAUTH_ID_REQ,
            SimAkaAttribute::Counter(_) => AT_COUNTER,
            SimAkaAttribute::ClientErrorCode(_) => AT_CLIENT_ERROR_CODE,
            SimAkaAttribute::KdfInput(_) => AT_KDF_INPUT,
            SimAkaAttribute::Kdf(_) => AT_KDF,
            SimAkaAttribute::Iv(_) => AT_IV,
            SimAkaAttribute::EncrData(_) => AT_ENCR_DATA,
            SimAkaAttribute::Skippable { attr_type, .. } => *attr_type,
        }
    }

    /// Decode one attribute; returns (attribute, bytes consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(Error::InvalidSyntax(
                "Truncated EAP-SIM/AKA attribute header".to_string(),
            ));
        }

        let attr_type = data[0];
        let length_words = data[1] as usize;
        if length_words == 0 {
            return Err(Error::InvalidSyntax(format!(
                "Attribute {} with zero length",
                attr_type
            )));
        }

        let total = length_words * 4;
        if data.len() < total {
            return Err(Error::InvalidSyntax(format!(
                "Attribute {} overruns the type data ({} > {})",
                attr_type,
                total,
                data.len()
            )));
        }
        let value = &data[2..total];

        let attribute = match attr_type {
            AT_RAND => {
                // 2 reserved bytes, then 16-byte RANDs
                let rands = &value[2..];
                if rands.is_empty() || rands.len() % 16 != 0 {
                    return Err(Error::InvalidSyntax(
                        "AT_RAND value is not a sequence of 16-byte RANDs".to_string(),
                    ));
                }
                SimAkaAttribute::Rand(rands.to_vec())
            }
            AT_AUTN => SimAkaAttribute::Autn(fixed_after_reserved(value, attr_type)?),
            AT_RES => {
                if value.len() < 2 {
                    return Err(Error::InvalidSyntax("Truncated AT_RES".to_string()));
                }
                let bits = u16::from_be_bytes([value[0], value[1]]) as usize;
                if bits % 8 != 0 || bits / 8 > value.len() - 2 {
                    return Err(Error::InvalidSyntax(format!(
                        "AT_RES carries {} bits in {} value bytes",
                        bits,
                        value.len() - 2
                    )));
                }
                SimAkaAttribute::Res(value[2..2 + bits / 8].to_vec())
            }
            AT_AUTS => {
                // No reserved prefix (RFC 4187 Section 10.9)
                let auts: [u8; AUTS_LEN] =
                    value.try_into().map_err(|_| Error::InvalidLength {
                        expected: AUTS_LEN,
                        actual: value.len(),
                    })?;
                SimAkaAttribute::Auts(auts)
            }
            AT_PADDING => {
                if value.iter().any(|&b| b != 0) {
                    return Err(Error::InvalidSyntax(
                        "AT_PADDING carries non-zero bytes".to_string(),
                    ));
                }
                SimAkaAttribute::Padding(value.len())
            }
            AT_NONCE_MT => SimAkaAttribute::NonceMt(fixed_after_reserved(value, attr_type)?),
            AT_PERMANENT_ID_REQ => SimAkaAttribute::PermanentIdReq,
            AT_MAC => SimAkaAttribute::Mac(fixed_after_reserved(value, attr_type)?),
            AT_NOTIFICATION => SimAkaAttribute::Notification(short_value(value)?),
            AT_ANY_ID_REQ => SimAkaAttribute::AnyIdReq,
            AT_IDENTITY => {
                let actual = short_value(value)? as usize;
                if actual > value.len() - 2 {
                    return Err(Error::InvalidSyntax(
                        "AT_IDENTITY actual length overruns the attribute".to_string(),
                    ));
                }
                SimAkaAttribute::Identity(value[2..2 + actual].to_vec())
            }
            AT_VERSION_LIST => {
                let actual = short_value(value)? as usize;
                if actual % 2 != 0 || actual > value.len() - 2 {
                    return Err(Error::InvalidSyntax(
                        "AT_VERSION_LIST actual length invalid".to_string(),
                    ));
                }
                let versions = value[2..2 + actual]
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                SimAkaAttribute::VersionList(versions)
            }
            AT_SELECTED_VERSION => SimAkaAttribute::SelectedVersion(short_value(value)?),
            AT_FULLAUTH_ID_REQ => SimAkaAttribute::FullauthIdReq,
            AT_COUNTER => SimAkaAttribute::Counter(short_value(value)?),
            AT_CLIENT_ERROR_CODE => SimAkaAttribute::ClientErrorCode(short_value(value)?),
            AT_KDF_INPUT => {
                let actual = short_value(value)? as usize;
                if actual > value.len() - 2 {
                    return Err(Error::InvalidSyntax(
                        "AT_KDF_INPUT actual length overruns the attribute".to_string(),
                    ));
                }
                SimAkaAttribute::KdfInput(value[2..2 + actual].to_vec())
            }
            AT_KDF => SimAkaAttribute::Kdf(short_value(value)?),
            AT_IV => SimAkaAttribute::Iv(fixed_after_reserved(value, attr_type)?),
            AT_ENCR_DATA => SimAkaAttribute::EncrData(value[2..].to_vec()),
            t if t >= 128 => SimAkaAttribute::Skippable {
                attr_type: t,
                value: value.to_vec(),
            },
            t => return Err(Error::UnsupportedAttribute(t as u16)),
        };

        Ok((attribute, total))
    }

    /// Encode the attribute including its header and padding
    pub fn encode(&self) -> Vec<u8> {
        let body: Vec<u8> = match self {
            SimAkaAttribute::Rand(rands) => with_reserved(rands),
            SimAkaAttribute::Autn(autn) => with_reserved(autn),
            SimAkaAttribute::Res(res) => {
                let mut out = ((res.len() * 8) as u16).to_be_bytes().to_vec();
                out.extend_from_slice(res);
                out
            }
            SimAkaAttribute::Auts(auts) => auts.to_vec(),
            SimAkaAttribute::Padding(len) => vec![0u8; *len],
            SimAkaAttribute::NonceMt(nonce) => with_reserved(nonce),
            SimAkaAttribute::PermanentIdReq
            | SimAkaAttribute::AnyIdReq
            | SimAkaAttribute::FullauthIdReq => vec![0u8, 0u8],
            SimAkaAttribute::Mac(mac) => with_reserved(mac),
            SimAkaAttribute::Notification(code)
            | SimAkaAttribute::SelectedVersion(code)
            | SimAkaAttribute::Counter(code)
            | SimAkaAttribute::ClientErrorCode(code)
            | SimAkaAttribute::Kdf(code) => code.to_be_bytes().to_vec(),
            SimAkaAttribute::Identity(identity) => with_actual_length(identity),
            SimAkaAttribute::VersionList(versions) => {
                let bytes: Vec<u8> =
                    versions.iter().flat_map(|v| v.to_be_bytes()).collect();
                with_actual_length(&bytes)
            }
            SimAkaAttribute::KdfInput(name) => with_actual_length(name),
            SimAkaAttribute::Iv(iv) => with_reserved(iv),
            SimAkaAttribute::EncrData(data) => with_reserved(data),
            SimAkaAttribute::Skippable { value, .. } => value.clone(),
        };

        // Pad the value to the 4-byte word boundary.
        let unpadded = 2 + body.len();
        let padded = (unpadded + 3) / 4 * 4;

        let mut out = Vec::with_capacity(padded);
        out.push(self.attr_type());
        out.push((padded / 4) as u8);
        out.extend_from_slice(&body);
        out.resize(padded, 0);
        out
    }
}

fn fixed_after_reserved<const N: usize>(value: &[u8], attr_type: u8) -> Result<[u8; N]> {
    if value.len() < 2 + N {
        return Err(Error::InvalidSyntax(format!(
            "Attribute {} value too short",
            attr_type
        )));
    }
    let out: [u8; N] = value[2..2 + N]
        .try_into()
        .map_err(|_| Error::InvalidLength {
            expected: N,
            actual: value.len() - 2,
        })?;
    Ok(out)
}

fn short_value(value: &[u8]) -> Result<u16> {
    if value.len() < 2 {
        return Err(Error::InvalidSyntax(
            "Attribute value shorter than 2 bytes".to_string(),
        ));
    }
    Ok(u16::from_be_bytes([value[0], value[1]]))
}

fn with_reserved(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8, 0u8];
    out.extend_from_slice(data);
    out
}

fn with_actual_length(data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(data);
    out
}
