//! EAP-SIM/AKA type-data coding shared by the method state machines
//!
//! Type-data layout (RFC 4186/4187 Section 8.1):
//!
//! ```text
//! | Subtype (1) | Reserved (2) | Attribute... |
//! ```

pub mod attribute;

pub use attribute::{SimAkaAttribute, AUTS_LEN};

use crate::eap::message::EAP_HEADER_LEN;
use crate::ike::{Error, Result};

/// EAP-SIM/AKA subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SimAkaSubtype {
    /// Challenge (1)
    Challenge = 1,
    /// AKA-Authentication-Reject (2)
    AuthenticationReject = 2,
    /// AKA-Synchronization-Failure (4)
    SynchronizationFailure = 4,
    /// AKA-Identity (5)
    Identity = 5,
    /// SIM-Start (10)
    Start = 10,
    /// SIM-Challenge (11)
    SimChallenge = 11,
    /// Notification (12)
    Notification = 12,
    /// Re-authentication (13)
    Reauthentication = 13,
    /// Client-Error (14)
    ClientError = 14,
}

impl SimAkaSubtype {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SimAkaSubtype::Challenge),
            2 => Some(SimAkaSubtype::AuthenticationReject),
            4 => Some(SimAkaSubtype::SynchronizationFailure),
            5 => Some(SimAkaSubtype::Identity),
            10 => Some(SimAkaSubtype::Start),
            11 => Some(SimAkaSubtype::SimChallenge),
            12 => Some(SimAkaSubtype::Notification),
            13 => Some(SimAkaSubtype::Reauthentication),
            14 => Some(SimAkaSubtype::ClientError),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded EAP-SIM/AKA type-data: a subtype plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimAkaTypeData {
    /// Message subtype
    pub subtype: SimAkaSubtype,

    /// Attributes in wire order
    pub attributes: Vec<SimAkaAttribute>,
}

impl SimAkaTypeData {
    /// Create type data
    pub fn new(subtype: SimAkaSubtype, attributes: Vec<SimAkaAttribute>) -> Self {
        SimAkaTypeData {
            subtype,
            attributes,
        }
    }

    /// Decode from the type-data bytes of an EAP message
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 3 {
            return Err(Error::InvalidSyntax(
                "EAP-SIM/AKA type data too short".to_string(),
            ));
        }

        let subtype = SimAkaSubtype::from_u8(data[0]).ok_or_else(|| {
            Error::InvalidSyntax(format!("Unknown EAP-SIM/AKA subtype: {}", data[0]))
        })?;
        // Bytes 1-2 are reserved

        let mut attributes = Vec::new();
        let mut offset = 3usize;
        while offset < data.len() {
            let (attribute, consumed) = SimAkaAttribute::decode(&data[offset..])?;
            // Duplicates of a non-skippable attribute are never valid.
            if attribute.attr_type() < 128
                && attributes
                    .iter()
                    .any(|a: &SimAkaAttribute| a.attr_type() == attribute.attr_type())
            {
                return Err(Error::InvalidSyntax(format!(
                    "Duplicate attribute {}",
                    attribute.attr_type()
                )));
            }
            attributes.push(attribute);
            offset += consumed;
        }

        Ok(SimAkaTypeData {
            subtype,
            attributes,
        })
    }

    /// Encode to type-data bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.subtype.to_u8(), 0, 0];
        for attribute in &self.attributes {
            out.extend_from_slice(&attribute.encode());
        }
        out
    }

    /// Find an attribute by type code
    pub fn get(&self, attr_type: u8) -> Option<&SimAkaAttribute> {
        self.attributes.iter().find(|a| a.attr_type() == attr_type)
    }

    /// Whether an attribute type is present
    pub fn has(&self, attr_type: u8) -> bool {
        self.get(attr_type).is_some()
    }
}

/// Return a copy of an encoded EAP message with the AT_MAC value zeroed.
///
/// The AT_MAC checksum is computed over the entire EAP packet with the MAC
/// field set to zero (RFC 4187 Section 10.15); both sides need this view.
///
/// # Errors
///
/// `InvalidSyntax` if the message carries no AT_MAC or its framing is
/// inconsistent.
pub fn zero_mac_in_message(message: &[u8]) -> Result<Vec<u8>> {
    // EAP header (4) + type (1) + subtype (1) + reserved (2)
    let attrs_start = EAP_HEADER_LEN + 4;
    if message.len() < attrs_start {
        return Err(Error::InvalidSyntax(
            "EAP message too short for SIM/AKA attributes".to_string(),
        ));
    }

    let mut out = message.to_vec();
    let mut offset = attrs_start;
    while offset + 2 <= out.len() {
        let attr_type = out[offset];
        let total = out[offset + 1] as usize * 4;
        if total == 0 || offset + total > out.len() {
            return Err(Error::InvalidSyntax(
                "Inconsistent attribute framing while locating AT_MAC".to_string(),
            ));
        }
        if attr_type == attribute::AT_MAC {
            if total != 20 {
                return Err(Error::InvalidSyntax(
                    "AT_MAC attribute has the wrong length".to_string(),
                ));
            }
            out[offset + 4..offset + 20].fill(0);
            return Ok(out);
        }
        offset += total;
    }

    Err(Error::InvalidSyntax(
        "EAP message carries no AT_MAC".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eap::message::{EapCode, EapMessage, TYPE_AKA};

    #[test]
    fn test_subtype_conversion() {
        assert_eq!(SimAkaSubtype::from_u8(1), Some(SimAkaSubtype::Challenge));
        assert_eq!(SimAkaSubtype::from_u8(5), Some(SimAkaSubtype::Identity));
        assert_eq!(SimAkaSubtype::from_u8(10), Some(SimAkaSubtype::Start));
        assert_eq!(SimAkaSubtype::from_u8(99), None);
        assert_eq!(SimAkaSubtype::SynchronizationFailure.to_u8(), 4);
    }

    #[test]
    fn test_type_data_roundtrip() {
        let td = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![
                SimAkaAttribute::Rand(vec![0xAA; 16]),
                SimAkaAttribute::Autn([0xBB; 16]),
                SimAkaAttribute::Mac([0x00; 16]),
            ],
        );

        let encoded = td.encode();
        assert_eq!(encoded[0], 1);
        let decoded = SimAkaTypeData::decode(&encoded).unwrap();
        assert_eq!(decoded, td);
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let td = SimAkaTypeData::new(
            SimAkaSubtype::Identity,
            vec![
                SimAkaAttribute::PermanentIdReq,
                SimAkaAttribute::PermanentIdReq,
            ],
        );
        let encoded = td.encode();
        let result = SimAkaTypeData::decode(&encoded);
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_get_and_has() {
        let td = SimAkaTypeData::new(
            SimAkaSubtype::Identity,
            vec![SimAkaAttribute::AnyIdReq],
        );
        assert!(td.has(attribute::AT_ANY_ID_REQ));
        assert!(!td.has(attribute::AT_MAC));
        assert!(matches!(
            td.get(attribute::AT_ANY_ID_REQ),
            Some(SimAkaAttribute::AnyIdReq)
        ));
    }

    #[test]
    fn test_zero_mac_in_message() {
        let td = SimAkaTypeData::new(
            SimAkaSubtype::Challenge,
            vec![
                SimAkaAttribute::Rand(vec![0xAA; 16]),
                SimAkaAttribute::Mac([0xCC; 16]),
            ],
        );
        let msg = EapMessage {
            code: EapCode::Request,
            identifier: 1,
            data: Some(crate::eap::message::EapData {
                eap_type: TYPE_AKA,
                type_data: td.encode(),
            }),
        };
        let bytes = msg.encode();

        let zeroed = zero_mac_in_message(&bytes).unwrap();
        assert_eq!(zeroed.len(), bytes.len());
        assert_ne!(zeroed, bytes);

        // Re-decode: the MAC value must now be zero.
        let decoded = EapMessage::decode(&zeroed).unwrap();
        let td = SimAkaTypeData::decode(&decoded.data.unwrap().type_data).unwrap();
        assert!(matches!(
            td.get(attribute::AT_MAC),
            Some(SimAkaAttribute::Mac(mac)) if *mac == [0u8; 16]
        ));
    }

    #[test]
    fn test_zero_mac_missing_mac() {
        let td = SimAkaTypeData::new(
            SimAkaSubtype::Identity,
            vec![SimAkaAttribute::AnyIdReq],
        );
        let msg = EapMessage {
            code: EapCode::Request,
            identifier: 1,
            data: Some(crate::eap::message::EapData {
                eap_type: TYPE_AKA,
                type_data: td.encode(),
            }),
        };
        let result = zero_mac_in_message(&msg.encode());
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }
}
