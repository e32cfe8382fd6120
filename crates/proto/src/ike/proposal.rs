//! IKEv2 Proposal and Transform structures
//!
//! Implements SA proposal coding and negotiation as defined in RFC 7296
//! Section 3.3.
//!
//! # Structure
//!
//! ```text
//! SA Payload
//!   └── Proposal(s)
//!         └── Transform(s)
//!               └── Attribute(s)   (Key Length only)
//! ```
//!
//! The initiator offers one or more proposals, each listing acceptable
//! transforms per type. A valid response carries exactly one proposal with
//! exactly one transform per required type, each drawn from the offered
//! set; [`SaPayload::validate_response`] enforces this.

use super::constants::PAYLOAD_HEADER_SIZE;
use crate::ike::{Error, Result};

/// Protocol ID for proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// IKE SA
    Ike = 1,
    /// AH (Authentication Header)
    Ah = 2,
    /// ESP (Encapsulating Security Payload)
    Esp = 3,
}

impl ProtocolId {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ProtocolId::Ike),
            2 => Some(ProtocolId::Ah),
            3 => Some(ProtocolId::Esp),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Transform Type (RFC 7296 Section 3.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransformType {
    /// Encryption Algorithm (ENCR)
    Encr = 1,
    /// Pseudo-random Function (PRF)
    Prf = 2,
    /// Integrity Algorithm (INTEG)
    Integ = 3,
    /// Diffie-Hellman Group (D-H)
    Dh = 4,
    /// Extended Sequence Numbers (ESN)
    Esn = 5,
}

impl TransformType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TransformType::Encr),
            2 => Some(TransformType::Prf),
            3 => Some(TransformType::Integ),
            4 => Some(TransformType::Dh),
            5 => Some(TransformType::Esn),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// All transform types, in wire order
    pub const ALL: [TransformType; 5] = [
        TransformType::Encr,
        TransformType::Prf,
        TransformType::Integ,
        TransformType::Dh,
        TransformType::Esn,
    ];
}

/// Encryption transform IDs (RFC 7296 / IANA)
pub mod encr {
    /// ENCR_3DES
    pub const TRIPLE_DES: u16 = 3;
    /// ENCR_AES_CBC
    pub const AES_CBC: u16 = 12;
    /// ENCR_AES_GCM_8 (8-octet ICV)
    pub const AES_GCM_8: u16 = 18;
    /// ENCR_AES_GCM_12 (12-octet ICV)
    pub const AES_GCM_12: u16 = 19;
    /// ENCR_AES_GCM_16 (16-octet ICV)
    pub const AES_GCM_16: u16 = 20;

    /// Whether an encryption transform ID is a combined-mode (AEAD) cipher
    pub fn is_aead(id: u16) -> bool {
        matches!(id, AES_GCM_8 | AES_GCM_12 | AES_GCM_16)
    }
}

/// PRF transform IDs
pub mod prf {
    /// PRF_HMAC_SHA1
    pub const HMAC_SHA1: u16 = 2;
    /// PRF_AES128_XCBC
    pub const AES128_XCBC: u16 = 4;
    /// PRF_HMAC_SHA2_256
    pub const HMAC_SHA2_256: u16 = 5;
    /// PRF_HMAC_SHA2_384
    pub const HMAC_SHA2_384: u16 = 6;
    /// PRF_HMAC_SHA2_512
    pub const HMAC_SHA2_512: u16 = 7;
}

/// Integrity transform IDs
pub mod integ {
    /// AUTH_NONE
    pub const NONE: u16 = 0;
    /// AUTH_HMAC_SHA1_96
    pub const HMAC_SHA1_96: u16 = 2;
    /// AUTH_AES_XCBC_96
    pub const AES_XCBC_96: u16 = 5;
    /// AUTH_HMAC_SHA2_256_128
    pub const HMAC_SHA2_256_128: u16 = 12;
    /// AUTH_HMAC_SHA2_384_192
    pub const HMAC_SHA2_384_192: u16 = 13;
    /// AUTH_HMAC_SHA2_512_256
    pub const HMAC_SHA2_512_256: u16 = 14;
}

/// Diffie-Hellman group transform IDs
pub mod dh {
    /// No Diffie-Hellman group
    pub const NONE: u16 = 0;
    /// 1024-bit MODP group
    pub const MODP_1024: u16 = 2;
    /// 2048-bit MODP group
    pub const MODP_2048: u16 = 14;
}

/// ESN transform IDs
pub mod esn {
    /// No extended sequence numbers
    pub const NO_ESN: u16 = 0;
    /// Extended sequence numbers
    pub const ESN: u16 = 1;
}

/// Key Length attribute type (the only attribute recognized here)
pub const ATTR_TYPE_KEY_LENGTH: u16 = 14;

/// Attribute Format flag: set = TV (shorthand), clear = TLV
const ATTR_FORMAT_TV: u16 = 0x8000;

/// IKE Transform
///
/// One algorithm choice, optionally carrying a Key Length attribute
/// (16-bit value in bits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    /// Transform type
    pub transform_type: TransformType,

    /// Transform ID
    pub transform_id: u16,

    /// Key Length attribute in bits, if present
    pub key_length: Option<u16>,
}

impl Transform {
    /// Create new transform without attributes
    pub fn new(transform_type: TransformType, transform_id: u16) -> Self {
        Transform {
            transform_type,
            transform_id,
            key_length: None,
        }
    }

    /// Create an encryption transform with a key length attribute
    pub fn encr_with_key_length(transform_id: u16, key_length: u16) -> Self {
        Transform {
            transform_type: TransformType::Encr,
            transform_id,
            key_length: Some(key_length),
        }
    }

    /// ENCR_3DES (fixed 192-bit key, no attribute)
    pub fn encr_3des() -> Self {
        Transform::new(TransformType::Encr, encr::TRIPLE_DES)
    }

    /// ENCR_AES_CBC with the given key length
    pub fn encr_aes_cbc(key_length: u16) -> Self {
        Transform::encr_with_key_length(encr::AES_CBC, key_length)
    }

    /// ENCR_AES_GCM_16 with the given key length
    pub fn encr_aes_gcm_16(key_length: u16) -> Self {
        Transform::encr_with_key_length(encr::AES_GCM_16, key_length)
    }

    /// PRF transform
    pub fn prf(transform_id: u16) -> Self {
        Transform::new(TransformType::Prf, transform_id)
    }

    /// Integrity transform
    pub fn integ(transform_id: u16) -> Self {
        Transform::new(TransformType::Integ, transform_id)
    }

    /// DH group transform
    pub fn dh(transform_id: u16) -> Self {
        Transform::new(TransformType::Dh, transform_id)
    }

    /// ESN transform
    pub fn esn(transform_id: u16) -> Self {
        Transform::new(TransformType::Esn, transform_id)
    }

    /// Whether this is a combined-mode (AEAD) encryption transform
    pub fn is_aead(&self) -> bool {
        self.transform_type == TransformType::Encr && encr::is_aead(self.transform_id)
    }

    /// Validate the key-length attribute against the transform ID.
    ///
    /// AES-CBC and AES-GCM require a key length of 128, 192 or 256 bits;
    /// 3DES and every non-ENCR transform carry none.
    pub fn validate_key_length(&self) -> Result<()> {
        match (self.transform_type, self.transform_id) {
            (TransformType::Encr, encr::AES_CBC)
            | (TransformType::Encr, encr::AES_GCM_8)
            | (TransformType::Encr, encr::AES_GCM_12)
            | (TransformType::Encr, encr::AES_GCM_16) => match self.key_length {
                Some(128) | Some(192) | Some(256) => Ok(()),
                Some(bits) => Err(Error::InvalidSyntax(format!(
                    "Invalid AES key length: {} bits",
                    bits
                ))),
                None => Err(Error::InvalidSyntax(
                    "AES transform requires a key length attribute".to_string(),
                )),
            },
            _ => {
                if self.key_length.is_some() {
                    Err(Error::InvalidSyntax(format!(
                        "Transform {:?}/{} must not carry a key length",
                        self.transform_type, self.transform_id
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Decode one transform substructure; returns (transform, more, consumed).
    fn decode(data: &[u8]) -> Result<(Self, bool, usize)> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let more = match data[0] {
            0 => false,
            3 => true,
            other => {
                return Err(Error::InvalidSyntax(format!(
                    "Invalid transform last/more flag: {}",
                    other
                )))
            }
        };
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        let transform_type = TransformType::from_u8(data[4]).ok_or_else(|| {
            Error::InvalidSyntax(format!("Unknown transform type: {}", data[4]))
        })?;
        let transform_id = u16::from_be_bytes([data[6], data[7]]);

        if length < 8 || data.len() < length {
            return Err(Error::InvalidLength {
                expected: length,
                actual: data.len(),
            });
        }

        let mut key_length = None;
        let mut offset = 8usize;
        while offset < length {
            if length < offset + 4 {
                return Err(Error::MalformedMessage(
                    "Truncated transform attribute".to_string(),
                ));
            }
            let raw_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let is_tv = raw_type & ATTR_FORMAT_TV != 0;
            let attr_type = raw_type & 0x7FFF;

            if attr_type != ATTR_TYPE_KEY_LENGTH {
                return Err(Error::UnsupportedAttribute(attr_type));
            }
            if key_length.is_some() {
                return Err(Error::InvalidSyntax(
                    "Duplicate key length attribute".to_string(),
                ));
            }

            if is_tv {
                key_length = Some(u16::from_be_bytes([data[offset + 2], data[offset + 3]]));
                offset += 4;
            } else {
                let attr_len =
                    u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
                if attr_len != 2 || length < offset + 4 + attr_len {
                    return Err(Error::InvalidSyntax(
                        "Invalid TLV key length attribute".to_string(),
                    ));
                }
                key_length = Some(u16::from_be_bytes([data[offset + 4], data[offset + 5]]));
                offset += 4 + attr_len;
            }
        }
        if offset != length {
            return Err(Error::MalformedMessage(
                "Transform attributes overrun the transform length".to_string(),
            ));
        }

        Ok((
            Transform {
                transform_type,
                transform_id,
                key_length,
            },
            more,
            length,
        ))
    }

    /// Encode one transform substructure with the given last/more flag
    fn encode(&self, more: bool) -> Vec<u8> {
        let attr_len = if self.key_length.is_some() { 4 } else { 0 };
        let length = (8 + attr_len) as u16;

        let mut out = Vec::with_capacity(length as usize);
        out.push(if more { 3 } else { 0 });
        out.push(0);
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.transform_type.to_u8());
        out.push(0);
        out.extend_from_slice(&self.transform_id.to_be_bytes());
        if let Some(bits) = self.key_length {
            out.extend_from_slice(&(ATTR_FORMAT_TV | ATTR_TYPE_KEY_LENGTH).to_be_bytes());
            out.extend_from_slice(&bits.to_be_bytes());
        }
        out
    }
}

/// IKE Proposal
///
/// A single proposal: a protocol, an optional SPI, and a transform list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Proposal number (1-based)
    pub proposal_num: u8,

    /// Protocol ID (IKE, ESP, AH)
    pub protocol_id: ProtocolId,

    /// SPI - empty for the initial IKE exchange
    pub spi: Vec<u8>,

    /// Ordered list of transforms
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// Create new proposal
    pub fn new(proposal_num: u8, protocol_id: ProtocolId) -> Self {
        Proposal {
            proposal_num,
            protocol_id,
            spi: Vec::new(),
            transforms: Vec::new(),
        }
    }

    /// Add transform to the proposal
    pub fn add_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Set SPI
    pub fn with_spi(mut self, spi: Vec<u8>) -> Self {
        self.spi = spi;
        self
    }

    /// Transforms of one type
    pub fn transforms_of_type(&self, transform_type: TransformType) -> Vec<&Transform> {
        self.transforms
            .iter()
            .filter(|t| t.transform_type == transform_type)
            .collect()
    }

    /// First transform of one type
    pub fn get_transform(&self, transform_type: TransformType) -> Option<&Transform> {
        self.transforms
            .iter()
            .find(|t| t.transform_type == transform_type)
    }

    /// Whether the proposal's encryption transforms are all combined-mode
    pub fn is_aead(&self) -> bool {
        let encrs = self.transforms_of_type(TransformType::Encr);
        !encrs.is_empty() && encrs.iter().all(|t| t.is_aead())
    }

    /// Validate an offer before sending.
    ///
    /// Enforces the per-proposal invariants: ENCR present for IKE/ESP, PRF
    /// and DH present for IKE, no mixing of AEAD and non-AEAD encryption,
    /// INTEG absent for AEAD and present for non-AEAD IKE, and key-length
    /// attribute constraints on every transform.
    pub fn validate_offer(&self) -> Result<()> {
        for t in &self.transforms {
            t.validate_key_length()?;
        }

        let encrs = self.transforms_of_type(TransformType::Encr);
        if self.protocol_id != ProtocolId::Ah && encrs.is_empty() {
            return Err(Error::InvalidSyntax(
                "Proposal requires at least one ENCR transform".to_string(),
            ));
        }

        let aead_count = encrs.iter().filter(|t| t.is_aead()).count();
        if aead_count != 0 && aead_count != encrs.len() {
            return Err(Error::InvalidSyntax(
                "Proposal mixes AEAD and non-AEAD encryption transforms".to_string(),
            ));
        }
        let is_aead = aead_count != 0 && aead_count == encrs.len();

        let has_integ = self
            .transforms_of_type(TransformType::Integ)
            .iter()
            .any(|t| t.transform_id != integ::NONE);
        if is_aead && has_integ {
            return Err(Error::InvalidSyntax(
                "Combined-mode proposal must not carry an INTEG transform".to_string(),
            ));
        }

        if self.protocol_id == ProtocolId::Ike {
            if self.get_transform(TransformType::Prf).is_none() {
                return Err(Error::InvalidSyntax(
                    "IKE proposal requires a PRF transform".to_string(),
                ));
            }
            if self.get_transform(TransformType::Dh).is_none() {
                return Err(Error::InvalidSyntax(
                    "IKE proposal requires a DH transform".to_string(),
                ));
            }
            if !is_aead && !has_integ {
                return Err(Error::InvalidSyntax(
                    "Non-AEAD IKE proposal requires an INTEG transform".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Check that `self` is a valid responder selection from `offer`.
    ///
    /// The selection must carry the same protocol, exactly one transform of
    /// each type present, and every selected transform (including its key
    /// length) must appear in the offered set. Combined-mode consistency is
    /// re-checked on the selection itself.
    pub fn is_negotiated_from(&self, offer: &Proposal) -> bool {
        if self.protocol_id != offer.protocol_id {
            return false;
        }

        // Empty offered set for a type means empty selected set; a
        // non-empty offered set means exactly one selection drawn from it.
        for transform_type in TransformType::ALL {
            let selected = self.transforms_of_type(transform_type);
            let offered = offer.transforms_of_type(transform_type);

            if offered.is_empty() {
                if !selected.is_empty() {
                    return false;
                }
                continue;
            }

            if selected.len() != 1 {
                return false;
            }
            let sel = selected[0];
            let found = offered
                .iter()
                .any(|t| t.transform_id == sel.transform_id && t.key_length == sel.key_length);
            if !found {
                return false;
            }
        }

        // Combined-mode consistency on the selection
        let selected_encr = self.get_transform(TransformType::Encr);
        let has_integ = self
            .transforms_of_type(TransformType::Integ)
            .iter()
            .any(|t| t.transform_id != integ::NONE);
        if let Some(encr) = selected_encr {
            if encr.is_aead() && has_integ {
                return false;
            }
            if self.protocol_id == ProtocolId::Ike && !encr.is_aead() && !has_integ {
                return false;
            }
        }

        true
    }

    /// Decode one proposal substructure; returns (proposal, more, consumed).
    fn decode(data: &[u8]) -> Result<(Self, bool, usize)> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let more = match data[0] {
            0 => false,
            2 => true,
            other => {
                return Err(Error::InvalidSyntax(format!(
                    "Invalid proposal last/more flag: {}",
                    other
                )))
            }
        };
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        let proposal_num = data[4];
        let protocol_id = ProtocolId::from_u8(data[5]).ok_or_else(|| {
            Error::InvalidSyntax(format!("Unknown protocol ID: {}", data[5]))
        })?;
        let spi_size = data[6] as usize;
        let num_transforms = data[7] as usize;

        if length < 8 + spi_size || data.len() < length {
            return Err(Error::InvalidLength {
                expected: length,
                actual: data.len(),
            });
        }

        let spi = data[8..8 + spi_size].to_vec();

        let mut transforms = Vec::with_capacity(num_transforms);
        let mut offset = 8 + spi_size;
        for i in 0..num_transforms {
            let (transform, more_transforms, consumed) = Transform::decode(&data[offset..length])?;
            let expect_more = i + 1 < num_transforms;
            if more_transforms != expect_more {
                return Err(Error::InvalidSyntax(
                    "Transform last/more flag disagrees with transform count".to_string(),
                ));
            }
            if transforms.contains(&transform) {
                return Err(Error::InvalidSyntax(format!(
                    "Duplicate transform {:?}/{} in proposal",
                    transform.transform_type, transform.transform_id
                )));
            }
            transforms.push(transform);
            offset += consumed;
        }

        if offset != length {
            return Err(Error::MalformedMessage(
                "Transforms do not fill the proposal length".to_string(),
            ));
        }
        if transforms.is_empty() {
            return Err(Error::InvalidSyntax(
                "Proposal carries no transforms".to_string(),
            ));
        }

        Ok((
            Proposal {
                proposal_num,
                protocol_id,
                spi,
                transforms,
            },
            more,
            length,
        ))
    }

    /// Encode one proposal substructure with the given last/more flag
    fn encode(&self, more: bool) -> Vec<u8> {
        let mut body = Vec::new();
        for (i, t) in self.transforms.iter().enumerate() {
            body.extend_from_slice(&t.encode(i + 1 < self.transforms.len()));
        }

        let length = (8 + self.spi.len() + body.len()) as u16;
        let mut out = Vec::with_capacity(length as usize);
        out.push(if more { 2 } else { 0 });
        out.push(0);
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.proposal_num);
        out.push(self.protocol_id.to_u8());
        out.push(self.spi.len() as u8);
        out.push(self.transforms.len() as u8);
        out.extend_from_slice(&self.spi);
        out.extend_from_slice(&body);
        out
    }
}

/// Security Association payload body: one or more proposals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaPayload {
    /// Proposal list
    pub proposals: Vec<Proposal>,
}

impl SaPayload {
    /// Create from a proposal list
    pub fn new(proposals: Vec<Proposal>) -> Result<Self> {
        if proposals.is_empty() {
            return Err(Error::InvalidSyntax(
                "SA payload requires at least one proposal".to_string(),
            ));
        }
        Ok(SaPayload { proposals })
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        let mut proposals = Vec::new();
        let mut offset = 0usize;
        let mut more = true;

        while more {
            let (proposal, more_proposals, consumed) = Proposal::decode(&data[offset..])?;
            proposals.push(proposal);
            offset += consumed;
            more = more_proposals;
        }

        if offset != data.len() {
            return Err(Error::MalformedMessage(
                "Trailing bytes after last proposal".to_string(),
            ));
        }

        Self::new(proposals)
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, p) in self.proposals.iter().enumerate() {
            out.extend_from_slice(&p.encode(i + 1 < self.proposals.len()));
        }
        out
    }

    /// Approximate encoded size including the generic payload header
    pub fn encoded_len(&self) -> usize {
        PAYLOAD_HEADER_SIZE + self.to_payload_data().len()
    }

    /// Validate a responder's SA payload against the proposals we offered.
    ///
    /// The response must contain exactly one proposal, matched by proposal
    /// number against the offer, and that proposal must be a valid
    /// selection per [`Proposal::is_negotiated_from`].
    ///
    /// # Errors
    ///
    /// Returns `NoProposalChosen` if the response is not a valid selection.
    pub fn validate_response(&self, offers: &SaPayload) -> Result<Proposal> {
        if self.proposals.len() != 1 {
            return Err(Error::NoProposalChosen);
        }
        let selected = &self.proposals[0];

        let offer = offers
            .proposals
            .iter()
            .find(|p| p.proposal_num == selected.proposal_num)
            .ok_or(Error::NoProposalChosen)?;

        if !selected.is_negotiated_from(offer) {
            return Err(Error::NoProposalChosen);
        }

        Ok(selected.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ike_offer() -> Proposal {
        Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::encr_aes_cbc(128))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
            .add_transform(Transform::dh(dh::MODP_2048))
    }

    fn ike_selection() -> Proposal {
        Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
            .add_transform(Transform::dh(dh::MODP_2048))
    }

    #[test]
    fn test_transform_type_conversion() {
        assert_eq!(TransformType::from_u8(1), Some(TransformType::Encr));
        assert_eq!(TransformType::from_u8(5), Some(TransformType::Esn));
        assert_eq!(TransformType::from_u8(99), None);
        assert_eq!(TransformType::Dh.to_u8(), 4);
    }

    #[test]
    fn test_aead_classification() {
        assert!(encr::is_aead(encr::AES_GCM_8));
        assert!(encr::is_aead(encr::AES_GCM_12));
        assert!(encr::is_aead(encr::AES_GCM_16));
        assert!(!encr::is_aead(encr::AES_CBC));
        assert!(!encr::is_aead(encr::TRIPLE_DES));
    }

    #[test]
    fn test_key_length_validation() {
        assert!(Transform::encr_aes_cbc(128).validate_key_length().is_ok());
        assert!(Transform::encr_aes_cbc(192).validate_key_length().is_ok());
        assert!(Transform::encr_aes_cbc(256).validate_key_length().is_ok());
        assert!(Transform::encr_aes_cbc(100).validate_key_length().is_err());

        // AES-CBC without key length is invalid
        let t = Transform::new(TransformType::Encr, encr::AES_CBC);
        assert!(t.validate_key_length().is_err());

        // 3DES must not carry a key length
        assert!(Transform::encr_3des().validate_key_length().is_ok());
        let t = Transform::encr_with_key_length(encr::TRIPLE_DES, 192);
        assert!(t.validate_key_length().is_err());

        // PRF must not carry a key length
        assert!(Transform::prf(prf::HMAC_SHA1).validate_key_length().is_ok());
    }

    #[test]
    fn test_sa_payload_roundtrip() {
        let sa = SaPayload::new(vec![
            ike_offer(),
            Proposal::new(2, ProtocolId::Ike)
                .add_transform(Transform::encr_aes_gcm_16(256))
                .add_transform(Transform::prf(prf::HMAC_SHA2_512))
                .add_transform(Transform::dh(dh::MODP_2048)),
        ])
        .unwrap();

        let data = sa.to_payload_data();
        let parsed = SaPayload::from_payload_data(&data).unwrap();
        assert_eq!(parsed, sa);
    }

    #[test]
    fn test_sa_payload_with_spi_roundtrip() {
        let sa = SaPayload::new(vec![Proposal::new(1, ProtocolId::Esp)
            .with_spi(vec![0xDE, 0xAD, 0xBE, 0xEF])
            .add_transform(Transform::encr_aes_gcm_16(128))
            .add_transform(Transform::esn(esn::NO_ESN))])
        .unwrap();

        let data = sa.to_payload_data();
        let parsed = SaPayload::from_payload_data(&data).unwrap();
        assert_eq!(parsed, sa);
        assert_eq!(parsed.proposals[0].spi, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_duplicate_transform_rejected() {
        let proposal = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
            .add_transform(Transform::dh(dh::MODP_2048));
        let sa = SaPayload::new(vec![proposal]).unwrap();

        let data = sa.to_payload_data();
        let result = SaPayload::from_payload_data(&data);
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let sa = SaPayload::new(vec![ike_selection()]).unwrap();
        let mut data = sa.to_payload_data();

        // The first transform's key length attribute starts 16 bytes in
        // (8 proposal header + 8 transform header). Rewrite its type to an
        // unrecognized TV attribute.
        let attr = (ATTR_FORMAT_TV | 99u16).to_be_bytes();
        data[16..18].copy_from_slice(&attr);

        let result = SaPayload::from_payload_data(&data);
        assert!(matches!(result, Err(Error::UnsupportedAttribute(99))));
    }

    #[test]
    fn test_offer_validation() {
        assert!(ike_offer().validate_offer().is_ok());

        // AEAD offer with INTEG is inconsistent
        let bad = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_gcm_16(256))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
            .add_transform(Transform::dh(dh::MODP_2048));
        assert!(bad.validate_offer().is_err());

        // Non-AEAD IKE offer without INTEG is incomplete
        let bad = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::dh(dh::MODP_2048));
        assert!(bad.validate_offer().is_err());

        // IKE offer without PRF
        let bad = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_gcm_16(256))
            .add_transform(Transform::dh(dh::MODP_2048));
        assert!(bad.validate_offer().is_err());
    }

    #[test]
    fn test_negotiation_accepts_valid_selection() {
        assert!(ike_selection().is_negotiated_from(&ike_offer()));
    }

    #[test]
    fn test_negotiation_rejects_unoffered_transform() {
        // Response proposes AES-GCM-16 while only AES-CBC was offered
        let selection = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_gcm_16(256))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::dh(dh::MODP_2048));
        assert!(!selection.is_negotiated_from(&ike_offer()));
    }

    #[test]
    fn test_negotiation_rejects_wrong_key_length() {
        let mut selection = ike_selection();
        selection.transforms[0] = Transform::encr_aes_cbc(192);
        assert!(!selection.is_negotiated_from(&ike_offer()));
    }

    #[test]
    fn test_negotiation_rejects_multiple_per_type() {
        let selection = ike_offer(); // still carries two ENCR choices
        assert!(!selection.is_negotiated_from(&ike_offer()));
    }

    #[test]
    fn test_negotiation_rejects_dropped_required_type() {
        let selection = Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_cbc(256))
            .add_transform(Transform::integ(integ::HMAC_SHA2_256_128))
            .add_transform(Transform::dh(dh::MODP_2048));
        assert!(!selection.is_negotiated_from(&ike_offer()));
    }

    #[test]
    fn test_negotiation_rejects_protocol_mismatch() {
        let mut selection = ike_selection();
        selection.protocol_id = ProtocolId::Esp;
        assert!(!selection.is_negotiated_from(&ike_offer()));
    }

    #[test]
    fn test_validate_response() {
        let offers = SaPayload::new(vec![ike_offer()]).unwrap();
        let response = SaPayload::new(vec![ike_selection()]).unwrap();

        let selected = response.validate_response(&offers).unwrap();
        assert_eq!(selected.proposal_num, 1);
        assert_eq!(
            selected.get_transform(TransformType::Encr).unwrap().key_length,
            Some(256)
        );
    }

    #[test]
    fn test_validate_response_no_proposal_chosen() {
        let offers = SaPayload::new(vec![ike_offer()]).unwrap();

        let response = SaPayload::new(vec![Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr_aes_gcm_16(256))
            .add_transform(Transform::prf(prf::HMAC_SHA2_256))
            .add_transform(Transform::dh(dh::MODP_2048))])
        .unwrap();

        let result = response.validate_response(&offers);
        assert!(matches!(result, Err(Error::NoProposalChosen)));
    }

    #[test]
    fn test_validate_response_rejects_two_proposals() {
        let offers = SaPayload::new(vec![ike_offer()]).unwrap();
        let response =
            SaPayload::new(vec![ike_selection(), ike_selection()]).unwrap();

        let result = response.validate_response(&offers);
        assert!(matches!(result, Err(Error::NoProposalChosen)));
    }

    #[test]
    fn test_esp_aead_selection() {
        let offer = Proposal::new(1, ProtocolId::Esp)
            .add_transform(Transform::encr_aes_gcm_16(128))
            .add_transform(Transform::encr_aes_gcm_16(256))
            .add_transform(Transform::esn(esn::NO_ESN));

        let selection = Proposal::new(1, ProtocolId::Esp)
            .add_transform(Transform::encr_aes_gcm_16(128))
            .add_transform(Transform::esn(esn::NO_ESN));

        assert!(selection.is_negotiated_from(&offer));
    }
}
