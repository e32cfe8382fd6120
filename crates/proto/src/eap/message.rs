//! EAP message framing (RFC 3748 Section 4)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::ike::{Error, Result};

/// EAP header length (code, identifier, length)
pub const EAP_HEADER_LEN: usize = 4;

/// EAP method type: Identity
pub const TYPE_IDENTITY: u8 = 1;
/// EAP method type: Notification
pub const TYPE_NOTIFICATION: u8 = 2;
/// EAP method type: Legacy Nak
pub const TYPE_NAK: u8 = 3;
/// EAP method type: EAP-SIM (RFC 4186)
pub const TYPE_SIM: u8 = 18;
/// EAP method type: EAP-AKA (RFC 4187)
pub const TYPE_AKA: u8 = 23;
/// EAP method type: EAP-MSCHAPv2
pub const TYPE_MSCHAPV2: u8 = 26;
/// EAP method type: EAP-AKA' (RFC 5448)
pub const TYPE_AKA_PRIME: u8 = 50;

/// EAP message codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EapCode {
    /// Request (1)
    Request = 1,
    /// Response (2)
    Response = 2,
    /// Success (3)
    Success = 3,
    /// Failure (4)
    Failure = 4,
}

impl EapCode {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Method type and type-data of a Request/Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapData {
    /// EAP method type
    pub eap_type: u8,
    /// Method type-data
    pub type_data: Vec<u8>,
}

/// One EAP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapMessage {
    /// Message code
    pub code: EapCode,

    /// Identifier matching requests to responses
    pub identifier: u8,

    /// Method data (present for Request/Response only)
    pub data: Option<EapData>,
}

impl EapMessage {
    /// Build a Response message
    pub fn response(identifier: u8, eap_type: u8, type_data: Vec<u8>) -> Self {
        EapMessage {
            code: EapCode::Response,
            identifier,
            data: Some(EapData {
                eap_type,
                type_data,
            }),
        }
    }

    /// Build an EAP-Response/Identity
    pub fn identity_response(identifier: u8, identity: &[u8]) -> Self {
        Self::response(identifier, TYPE_IDENTITY, identity.to_vec())
    }

    /// Build an EAP-Response/Nak proposing our method type
    pub fn nak_response(identifier: u8, preferred_type: u8) -> Self {
        Self::response(identifier, TYPE_NAK, vec![preferred_type])
    }

    /// Decode an EAP message.
    ///
    /// # Errors
    ///
    /// `InvalidSyntax` on bad code, truncated data or a length field that
    /// disagrees with the buffer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < EAP_HEADER_LEN {
            return Err(Error::InvalidSyntax(format!(
                "EAP message too short: {} bytes",
                data.len()
            )));
        }

        let code = EapCode::from_u8(data[0])
            .ok_or_else(|| Error::InvalidSyntax(format!("Unknown EAP code: {}", data[0])))?;
        let identifier = data[1];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;

        if length != data.len() {
            return Err(Error::InvalidSyntax(format!(
                "EAP length field {} does not match buffer length {}",
                length,
                data.len()
            )));
        }

        let data = match code {
            EapCode::Success | EapCode::Failure => {
                if length != EAP_HEADER_LEN {
                    return Err(Error::InvalidSyntax(
                        "EAP Success/Failure must be exactly 4 bytes".to_string(),
                    ));
                }
                None
            }
            EapCode::Request | EapCode::Response => {
                if length < EAP_HEADER_LEN + 1 {
                    return Err(Error::InvalidSyntax(
                        "EAP Request/Response missing type byte".to_string(),
                    ));
                }
                Some(EapData {
                    eap_type: data[4],
                    type_data: data[5..].to_vec(),
                })
            }
        };

        Ok(EapMessage {
            code,
            identifier,
            data,
        })
    }

    /// Encode the message
    pub fn encode(&self) -> Vec<u8> {
        let data_len = self
            .data
            .as_ref()
            .map(|d| 1 + d.type_data.len())
            .unwrap_or(0);
        let length = (EAP_HEADER_LEN + data_len) as u16;

        let mut out = Vec::with_capacity(length as usize);
        out.push(self.code.to_u8());
        out.push(self.identifier);
        out.extend_from_slice(&length.to_be_bytes());
        if let Some(d) = &self.data {
            out.push(d.eap_type);
            out.extend_from_slice(&d.type_data);
        }
        out
    }
}
