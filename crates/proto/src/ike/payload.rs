//! IKEv2 payload structures and parsing
//!
//! Implements the payload bodies defined in RFC 7296 Section 3. Each
//! payload codes only its body; the generic payload header (next payload,
//! critical bit, length) is handled by the chain coder in
//! [`crate::ike::message`].

use std::net::{Ipv4Addr, Ipv6Addr};

use super::constants::PayloadType;
use super::proposal::{ProtocolId, SaPayload};
use super::ts::TsPayload;
use crate::ike::{Error, Result};

/// Notify message types (RFC 7296 Section 3.10.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NotifyType {
    /// UNSUPPORTED_CRITICAL_PAYLOAD (1)
    UnsupportedCriticalPayload = 1,
    /// INVALID_SYNTAX (7)
    InvalidSyntax = 7,
    /// NO_PROPOSAL_CHOSEN (14)
    NoProposalChosen = 14,
    /// INVALID_KE_PAYLOAD (17)
    InvalidKePayload = 17,
    /// AUTHENTICATION_FAILED (24)
    AuthenticationFailed = 24,
    /// TS_UNACCEPTABLE (38)
    TsUnacceptable = 38,
    /// INITIAL_CONTACT (16384)
    InitialContact = 16384,
    /// USE_TRANSPORT_MODE (16391)
    UseTransportMode = 16391,
    /// REKEY_SA (16393)
    RekeySa = 16393,
}

impl NotifyType {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(NotifyType::UnsupportedCriticalPayload),
            7 => Some(NotifyType::InvalidSyntax),
            14 => Some(NotifyType::NoProposalChosen),
            17 => Some(NotifyType::InvalidKePayload),
            24 => Some(NotifyType::AuthenticationFailed),
            38 => Some(NotifyType::TsUnacceptable),
            16384 => Some(NotifyType::InitialContact),
            16391 => Some(NotifyType::UseTransportMode),
            16393 => Some(NotifyType::RekeySa),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Error notify types are below 16384
    pub fn is_error(self) -> bool {
        self.to_u16() < 16384
    }
}

/// Nonce Payload (RFC 7296 Section 3.9)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoncePayload {
    /// Nonce data (16-256 bytes of random data)
    pub nonce: Vec<u8>,
}

impl NoncePayload {
    /// Minimum nonce size (16 bytes)
    pub const MIN_SIZE: usize = 16;

    /// Maximum nonce size (256 bytes)
    pub const MAX_SIZE: usize = 256;

    /// Create new nonce payload
    pub fn new(nonce: Vec<u8>) -> Result<Self> {
        if nonce.len() < Self::MIN_SIZE || nonce.len() > Self::MAX_SIZE {
            return Err(Error::InvalidSyntax(format!(
                "Nonce length {} outside [{}, {}]",
                nonce.len(),
                Self::MIN_SIZE,
                Self::MAX_SIZE
            )));
        }
        Ok(NoncePayload { nonce })
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        Self::new(data.to_vec())
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        self.nonce.clone()
    }
}

/// Key Exchange Payload (RFC 7296 Section 3.4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KePayload {
    /// Diffie-Hellman group number
    pub dh_group: u16,

    /// Key exchange data (public value)
    pub key_data: Vec<u8>,
}

impl KePayload {
    /// Create new KE payload
    pub fn new(dh_group: u16, key_data: Vec<u8>) -> Self {
        KePayload { dh_group, key_data }
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let dh_group = u16::from_be_bytes([data[0], data[1]]);
        // Bytes 2-3 are reserved
        let key_data = data[4..].to_vec();

        Ok(KePayload { dh_group, key_data })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.key_data.len());
        data.extend_from_slice(&self.dh_group.to_be_bytes());
        data.extend_from_slice(&[0u8, 0u8]);
        data.extend_from_slice(&self.key_data);
        data
    }
}

/// Identification types (RFC 7296 Section 3.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IdType {
    /// IPv4 address (1)
    Ipv4Addr = 1,
    /// Fully-qualified domain name (2)
    Fqdn = 2,
    /// RFC 822 email address (3)
    Rfc822Addr = 3,
    /// IPv6 address (5)
    Ipv6Addr = 5,
    /// DER-encoded ASN.1 X.500 Distinguished Name (9)
    DerAsn1Dn = 9,
    /// Opaque key ID (11)
    KeyId = 11,
}

impl IdType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(IdType::Ipv4Addr),
            2 => Some(IdType::Fqdn),
            3 => Some(IdType::Rfc822Addr),
            5 => Some(IdType::Ipv6Addr),
            9 => Some(IdType::DerAsn1Dn),
            11 => Some(IdType::KeyId),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A validated IKE identification value.
///
/// Each variant validates its payload bytes on construction, so a held
/// value is always well-formed for its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IkeIdentification {
    /// IPv4 address identity
    Ipv4(Ipv4Addr),
    /// Fully-qualified domain name identity
    Fqdn(String),
    /// Email address identity
    Rfc822(String),
    /// IPv6 address identity
    Ipv6(Ipv6Addr),
    /// DER-encoded distinguished name identity
    DerAsn1Dn(Vec<u8>),
    /// Opaque key-id identity
    KeyId(Vec<u8>),
}

impl IkeIdentification {
    /// Build an FQDN identity; must be non-empty and contain no '@'.
    pub fn fqdn(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('@') {
            return Err(Error::InvalidSyntax(format!("Invalid FQDN: {:?}", name)));
        }
        Ok(IkeIdentification::Fqdn(name))
    }

    /// Build an RFC 822 email identity; must contain '@'.
    pub fn rfc822(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        if !addr.contains('@') {
            return Err(Error::InvalidSyntax(format!(
                "Invalid RFC 822 address: {:?}",
                addr
            )));
        }
        Ok(IkeIdentification::Rfc822(addr))
    }

    /// Build an opaque key-id identity; must be non-empty.
    pub fn key_id(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidSyntax("Empty KEY_ID identity".to_string()));
        }
        Ok(IkeIdentification::KeyId(data))
    }

    /// Identification type code
    pub fn id_type(&self) -> IdType {
        match self {
            IkeIdentification::Ipv4(_) => IdType::Ipv4Addr,
            IkeIdentification::Fqdn(_) => IdType::Fqdn,
            IkeIdentification::Rfc822(_) => IdType::Rfc822Addr,
            IkeIdentification::Ipv6(_) => IdType::Ipv6Addr,
            IkeIdentification::DerAsn1Dn(_) => IdType::DerAsn1Dn,
            IkeIdentification::KeyId(_) => IdType::KeyId,
        }
    }

    /// Identity value bytes as carried on the wire
    pub fn value_bytes(&self) -> Vec<u8> {
        match self {
            IkeIdentification::Ipv4(addr) => addr.octets().to_vec(),
            IkeIdentification::Fqdn(s) | IkeIdentification::Rfc822(s) => {
                s.as_bytes().to_vec()
            }
            IkeIdentification::Ipv6(addr) => addr.octets().to_vec(),
            IkeIdentification::DerAsn1Dn(d) | IkeIdentification::KeyId(d) => d.clone(),
        }
    }

    /// Reconstruct from a wire (type, bytes) pair, validating the bytes.
    pub fn from_wire(id_type: IdType, data: &[u8]) -> Result<Self> {
        match id_type {
            IdType::Ipv4Addr => {
                let octets: [u8; 4] = data.try_into().map_err(|_| Error::InvalidLength {
                    expected: 4,
                    actual: data.len(),
                })?;
                Ok(IkeIdentification::Ipv4(Ipv4Addr::from(octets)))
            }
            IdType::Fqdn => {
                let s = std::str::from_utf8(data)
                    .map_err(|_| Error::InvalidSyntax("FQDN is not UTF-8".to_string()))?;
                Self::fqdn(s)
            }
            IdType::Rfc822Addr => {
                let s = std::str::from_utf8(data).map_err(|_| {
                    Error::InvalidSyntax("RFC 822 address is not UTF-8".to_string())
                })?;
                Self::rfc822(s)
            }
            IdType::Ipv6Addr => {
                let octets: [u8; 16] = data.try_into().map_err(|_| Error::InvalidLength {
                    expected: 16,
                    actual: data.len(),
                })?;
                Ok(IkeIdentification::Ipv6(Ipv6Addr::from(octets)))
            }
            IdType::DerAsn1Dn => {
                // Minimal DER check: a non-empty SEQUENCE.
                if data.len() < 2 || data[0] != 0x30 {
                    return Err(Error::InvalidSyntax(
                        "DER ASN.1 DN is not a SEQUENCE".to_string(),
                    ));
                }
                Ok(IkeIdentification::DerAsn1Dn(data.to_vec()))
            }
            IdType::KeyId => Self::key_id(data.to_vec()),
        }
    }
}

/// Identification Payload (IDi / IDr, RFC 7296 Section 3.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPayload {
    /// Validated identity
    pub id: IkeIdentification,
}

impl IdPayload {
    /// Create from an identity
    pub fn new(id: IkeIdentification) -> Self {
        IdPayload { id }
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let id_type = IdType::from_u8(data[0]).ok_or_else(|| {
            Error::InvalidSyntax(format!("Unknown identification type: {}", data[0]))
        })?;
        // Bytes 1-3 are reserved
        let id = IkeIdentification::from_wire(id_type, &data[4..])?;

        Ok(IdPayload { id })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let value = self.id.value_bytes();
        let mut data = Vec::with_capacity(4 + value.len());
        data.push(self.id.id_type().to_u8());
        data.extend_from_slice(&[0u8; 3]);
        data.extend_from_slice(&value);
        data
    }
}

/// Authentication methods (RFC 7296 Section 3.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AuthMethod {
    /// RSA digital signature (1)
    RsaSig = 1,
    /// Shared key message integrity code (2)
    SharedKeyMic = 2,
    /// DSS digital signature (3)
    DssSig = 3,
}

impl AuthMethod {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AuthMethod::RsaSig),
            2 => Some(AuthMethod::SharedKeyMic),
            3 => Some(AuthMethod::DssSig),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Authentication Payload (RFC 7296 Section 3.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    /// Authentication method
    pub auth_method: AuthMethod,

    /// Authentication data
    pub auth_data: Vec<u8>,
}

impl AuthPayload {
    /// Create new AUTH payload
    pub fn new(auth_method: AuthMethod, auth_data: Vec<u8>) -> Self {
        AuthPayload {
            auth_method,
            auth_data,
        }
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let auth_method = AuthMethod::from_u8(data[0]).ok_or_else(|| {
            Error::InvalidSyntax(format!("Unknown auth method: {}", data[0]))
        })?;
        // Bytes 1-3 are reserved
        Ok(AuthPayload {
            auth_method,
            auth_data: data[4..].to_vec(),
        })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.auth_data.len());
        data.push(self.auth_method.to_u8());
        data.extend_from_slice(&[0u8; 3]);
        data.extend_from_slice(&self.auth_data);
        data
    }
}

/// Notify Payload (RFC 7296 Section 3.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    /// Protocol ID (0 when the notify concerns no specific SA)
    pub protocol_id: u8,

    /// SPI of the SA the notification concerns (may be empty)
    pub spi: Vec<u8>,

    /// Notify message type
    pub notify_type: u16,

    /// Notification data
    pub data: Vec<u8>,
}

impl NotifyPayload {
    /// Create a status or error notify without an SPI
    pub fn status(notify_type: NotifyType, data: Vec<u8>) -> Self {
        NotifyPayload {
            protocol_id: 0,
            spi: Vec::new(),
            notify_type: notify_type.to_u16(),
            data,
        }
    }

    /// Create a notify scoped to a Child SA SPI
    pub fn for_child_sa(notify_type: NotifyType, protocol: ProtocolId, spi: [u8; 4]) -> Self {
        NotifyPayload {
            protocol_id: protocol.to_u8(),
            spi: spi.to_vec(),
            notify_type: notify_type.to_u16(),
            data: Vec::new(),
        }
    }

    /// Recognized notify type, if any
    pub fn known_type(&self) -> Option<NotifyType> {
        NotifyType::from_u16(self.notify_type)
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let protocol_id = data[0];
        let spi_size = data[1] as usize;
        let notify_type = u16::from_be_bytes([data[2], data[3]]);

        if data.len() < 4 + spi_size {
            return Err(Error::BufferTooShort {
                required: 4 + spi_size,
                available: data.len(),
            });
        }

        Ok(NotifyPayload {
            protocol_id,
            spi: data[4..4 + spi_size].to_vec(),
            notify_type,
            data: data[4 + spi_size..].to_vec(),
        })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.spi.len() + self.data.len());
        out.push(self.protocol_id);
        out.push(self.spi.len() as u8);
        out.extend_from_slice(&self.notify_type.to_be_bytes());
        out.extend_from_slice(&self.spi);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Delete Payload (RFC 7296 Section 3.11)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    /// Protocol of the SAs being deleted
    pub protocol_id: ProtocolId,

    /// SPI size in bytes (0 for IKE, 4 for ESP/AH)
    pub spi_size: u8,

    /// SPIs being deleted
    pub spis: Vec<Vec<u8>>,
}

impl DeletePayload {
    /// Delete the IKE SA itself (no SPI list)
    pub fn delete_ike_sa() -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Ike,
            spi_size: 0,
            spis: Vec::new(),
        }
    }

    /// Delete ESP Child SAs by SPI
    pub fn delete_child_sas(spis: Vec<[u8; 4]>) -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Esp,
            spi_size: 4,
            spis: spis.into_iter().map(|s| s.to_vec()).collect(),
        }
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let protocol_id = ProtocolId::from_u8(data[0]).ok_or_else(|| {
            Error::InvalidSyntax(format!("Unknown protocol ID in Delete: {}", data[0]))
        })?;
        let spi_size = data[1] as usize;
        let num_spis = u16::from_be_bytes([data[2], data[3]]) as usize;

        if data.len() != 4 + spi_size * num_spis {
            return Err(Error::InvalidLength {
                expected: 4 + spi_size * num_spis,
                actual: data.len(),
            });
        }

        let mut spis = Vec::with_capacity(num_spis);
        for i in 0..num_spis {
            let start = 4 + i * spi_size;
            spis.push(data[start..start + spi_size].to_vec());
        }

        Ok(DeletePayload {
            protocol_id,
            spi_size: spi_size as u8,
            spis,
        })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.protocol_id.to_u8());
        out.push(self.spi_size);
        out.extend_from_slice(&(self.spis.len() as u16).to_be_bytes());
        for spi in &self.spis {
            out.extend_from_slice(spi);
        }
        out
    }
}

/// Certificate encoding (RFC 7296 Section 3.6); only X.509 is used here.
pub const CERT_ENCODING_X509_SIGNATURE: u8 = 4;

/// Certificate Payload (RFC 7296 Section 3.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPayload {
    /// Certificate encoding
    pub encoding: u8,
    /// Certificate data
    pub data: Vec<u8>,
}

impl CertPayload {
    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::BufferTooShort {
                required: 1,
                available: 0,
            });
        }
        Ok(CertPayload {
            encoding: data[0],
            data: data[1..].to_vec(),
        })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data.len());
        out.push(self.encoding);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Certificate Request Payload (RFC 7296 Section 3.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertReqPayload {
    /// Requested certificate encoding
    pub encoding: u8,
    /// Concatenated SHA-1 hashes of trusted CA subject public key infos
    pub authorities: Vec<u8>,
}

impl CertReqPayload {
    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::BufferTooShort {
                required: 1,
                available: 0,
            });
        }
        Ok(CertReqPayload {
            encoding: data[0],
            authorities: data[1..].to_vec(),
        })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.authorities.len());
        out.push(self.encoding);
        out.extend_from_slice(&self.authorities);
        out
    }
}

/// Vendor ID Payload (RFC 7296 Section 3.12)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorIdPayload {
    /// Opaque vendor data
    pub data: Vec<u8>,
}

/// Configuration payload types (RFC 7296 Section 3.15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CfgType {
    /// CFG_REQUEST (1)
    Request = 1,
    /// CFG_REPLY (2)
    Reply = 2,
    /// CFG_SET (3)
    Set = 3,
    /// CFG_ACK (4)
    Ack = 4,
}

impl CfgType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CfgType::Request),
            2 => Some(CfgType::Reply),
            3 => Some(CfgType::Set),
            4 => Some(CfgType::Ack),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Recognized configuration attribute types (RFC 7296 Section 3.15.1)
pub mod cfg_attr {
    /// INTERNAL_IP4_ADDRESS
    pub const INTERNAL_IP4_ADDRESS: u16 = 1;
    /// INTERNAL_IP4_DNS
    pub const INTERNAL_IP4_DNS: u16 = 3;
    /// APPLICATION_VERSION
    pub const APPLICATION_VERSION: u16 = 7;
    /// INTERNAL_IP4_SUBNET
    pub const INTERNAL_IP4_SUBNET: u16 = 13;
}

/// A single configuration attribute (15-bit type, TLV form)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigAttribute {
    /// Attribute type (high bit reserved)
    pub attr_type: u16,
    /// Attribute value (empty in CFG_REQUEST)
    pub value: Vec<u8>,
}

/// Configuration Payload (RFC 7296 Section 3.15)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPayload {
    /// CFG type
    pub cfg_type: CfgType,
    /// Attribute list
    pub attributes: Vec<ConfigAttribute>,
}

impl ConfigPayload {
    /// Build a CFG_REQUEST for the given attribute types
    pub fn request(attr_types: &[u16]) -> Self {
        ConfigPayload {
            cfg_type: CfgType::Request,
            attributes: attr_types
                .iter()
                .map(|&attr_type| ConfigAttribute {
                    attr_type,
                    value: Vec::new(),
                })
                .collect(),
        }
    }

    /// Look up an attribute value by type
    pub fn get(&self, attr_type: u16) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|a| a.attr_type == attr_type)
            .map(|a| a.value.as_slice())
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let cfg_type = CfgType::from_u8(data[0])
            .ok_or_else(|| Error::InvalidSyntax(format!("Unknown CFG type: {}", data[0])))?;
        // Bytes 1-3 are reserved

        let mut attributes = Vec::new();
        let mut offset = 4usize;
        while offset < data.len() {
            if data.len() < offset + 4 {
                return Err(Error::MalformedMessage(
                    "Truncated configuration attribute".to_string(),
                ));
            }
            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]) & 0x7FFF;
            let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            if data.len() < offset + 4 + length {
                return Err(Error::MalformedMessage(
                    "Configuration attribute overruns payload".to_string(),
                ));
            }
            attributes.push(ConfigAttribute {
                attr_type,
                value: data[offset + 4..offset + 4 + length].to_vec(),
            });
            offset += 4 + length;
        }

        Ok(ConfigPayload {
            cfg_type,
            attributes,
        })
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = vec![self.cfg_type.to_u8(), 0, 0, 0];
        for attr in &self.attributes {
            out.extend_from_slice(&(attr.attr_type & 0x7FFF).to_be_bytes());
            out.extend_from_slice(&(attr.value.len() as u16).to_be_bytes());
            out.extend_from_slice(&attr.value);
        }
        out
    }
}

/// Encrypted and Authenticated Payload (SK, RFC 7296 Section 3.14)
///
/// The body is kept raw: IV ‖ ciphertext ‖ ICV (non-AEAD) or IV ‖
/// ciphertext‖tag (AEAD). The codec never parses the ciphertext; the crypto
/// session splits and opens it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkPayload {
    /// Type code of the first payload inside the encrypted chain
    pub first_payload: u8,

    /// Raw body: IV ‖ ciphertext ‖ ICV
    pub data: Vec<u8>,
}

impl SkPayload {
    /// Split the body into (IV, ciphertext, ICV) slices.
    ///
    /// For AEAD ciphers `icv_len` is 0 and the tag stays attached to the
    /// ciphertext slice.
    pub fn split(&self, iv_len: usize, icv_len: usize) -> Result<(&[u8], &[u8], &[u8])> {
        if self.data.len() < iv_len + icv_len {
            return Err(Error::BufferTooShort {
                required: iv_len + icv_len,
                available: self.data.len(),
            });
        }
        let iv = &self.data[..iv_len];
        let ct = &self.data[iv_len..self.data.len() - icv_len];
        let icv = &self.data[self.data.len() - icv_len..];
        Ok((iv, ct, icv))
    }
}

/// EAP Payload (RFC 7296 Section 3.16)
///
/// Carries one complete EAP message; framing is handled by
/// [`crate::eap::message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPayload {
    /// Raw EAP message bytes
    pub message: Vec<u8>,
}

/// A decoded IKE payload.
///
/// Unrecognized non-critical payloads are preserved raw so that messages
/// round-trip; unrecognized critical payloads fail decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Security Association payload
    Sa(SaPayload),
    /// Key Exchange payload
    Ke(KePayload),
    /// Initiator identification payload
    IdInit(IdPayload),
    /// Responder identification payload
    IdResp(IdPayload),
    /// Certificate payload
    Cert(CertPayload),
    /// Certificate request payload
    CertReq(CertReqPayload),
    /// Authentication payload
    Auth(AuthPayload),
    /// Nonce payload
    Nonce(NoncePayload),
    /// Notify payload
    Notify(NotifyPayload),
    /// Delete payload
    Delete(DeletePayload),
    /// Vendor ID payload
    VendorId(VendorIdPayload),
    /// Initiator traffic selectors
    TsInit(TsPayload),
    /// Responder traffic selectors
    TsResp(TsPayload),
    /// Encrypted and Authenticated payload
    Sk(SkPayload),
    /// Configuration payload
    Config(ConfigPayload),
    /// EAP payload
    Eap(EapPayload),
    /// Unrecognized non-critical payload, preserved raw
    Unknown {
        /// Payload type code
        payload_type: u8,
        /// Critical bit as received
        critical: bool,
        /// Raw body
        data: Vec<u8>,
    },
}

impl Payload {
    /// Decode a payload body for the given type code.
    pub fn decode(code: u8, critical: bool, body: &[u8]) -> Result<Payload> {
        let payload = match PayloadType::from_u8(code) {
            Some(PayloadType::SA) => Payload::Sa(SaPayload::from_payload_data(body)?),
            Some(PayloadType::KE) => Payload::Ke(KePayload::from_payload_data(body)?),
            Some(PayloadType::IDi) => Payload::IdInit(IdPayload::from_payload_data(body)?),
            Some(PayloadType::IDr) => Payload::IdResp(IdPayload::from_payload_data(body)?),
            Some(PayloadType::CERT) => Payload::Cert(CertPayload::from_payload_data(body)?),
            Some(PayloadType::CERTREQ) => {
                Payload::CertReq(CertReqPayload::from_payload_data(body)?)
            }
            Some(PayloadType::AUTH) => Payload::Auth(AuthPayload::from_payload_data(body)?),
            Some(PayloadType::Nonce) => {
                Payload::Nonce(NoncePayload::from_payload_data(body)?)
            }
            Some(PayloadType::N) => Payload::Notify(NotifyPayload::from_payload_data(body)?),
            Some(PayloadType::D) => Payload::Delete(DeletePayload::from_payload_data(body)?),
            Some(PayloadType::V) => Payload::VendorId(VendorIdPayload {
                data: body.to_vec(),
            }),
            Some(PayloadType::TSi) => Payload::TsInit(TsPayload::from_payload_data(body)?),
            Some(PayloadType::TSr) => Payload::TsResp(TsPayload::from_payload_data(body)?),
            Some(PayloadType::CP) => {
                Payload::Config(ConfigPayload::from_payload_data(body)?)
            }
            Some(PayloadType::EAP) => Payload::Eap(EapPayload {
                message: body.to_vec(),
            }),
            // SK is handled by the chain walker via decode_sk
            Some(PayloadType::SK) | Some(PayloadType::None) | None => {
                if critical {
                    return Err(Error::UnsupportedPayload(code));
                }
                Payload::Unknown {
                    payload_type: code,
                    critical,
                    data: body.to_vec(),
                }
            }
        };
        Ok(payload)
    }

    /// Decode an SK payload; `first_payload` is taken from the SK generic
    /// header's next-payload field.
    pub fn decode_sk(first_payload: u8, _critical: bool, body: &[u8]) -> Result<Payload> {
        // Critical bit must be ignored when decoding SK.
        Ok(Payload::Sk(SkPayload {
            first_payload,
            data: body.to_vec(),
        }))
    }

    /// Payload type code for the chain
    pub fn payload_type_code(&self) -> u8 {
        match self {
            Payload::Sa(_) => PayloadType::SA.to_u8(),
            Payload::Ke(_) => PayloadType::KE.to_u8(),
            Payload::IdInit(_) => PayloadType::IDi.to_u8(),
            Payload::IdResp(_) => PayloadType::IDr.to_u8(),
            Payload::Cert(_) => PayloadType::CERT.to_u8(),
            Payload::CertReq(_) => PayloadType::CERTREQ.to_u8(),
            Payload::Auth(_) => PayloadType::AUTH.to_u8(),
            Payload::Nonce(_) => PayloadType::Nonce.to_u8(),
            Payload::Notify(_) => PayloadType::N.to_u8(),
            Payload::Delete(_) => PayloadType::D.to_u8(),
            Payload::VendorId(_) => PayloadType::V.to_u8(),
            Payload::TsInit(_) => PayloadType::TSi.to_u8(),
            Payload::TsResp(_) => PayloadType::TSr.to_u8(),
            Payload::Sk(_) => PayloadType::SK.to_u8(),
            Payload::Config(_) => PayloadType::CP.to_u8(),
            Payload::Eap(_) => PayloadType::EAP.to_u8(),
            Payload::Unknown { payload_type, .. } => *payload_type,
        }
    }

    /// Critical bit for encoding (always clear for the payload types
    /// defined by RFC 7296 itself)
    pub fn is_critical(&self) -> bool {
        match self {
            Payload::Unknown { critical, .. } => *critical,
            _ => false,
        }
    }

    /// Serialize the payload body (without the generic header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        match self {
            Payload::Sa(p) => p.to_payload_data(),
            Payload::Ke(p) => p.to_payload_data(),
            Payload::IdInit(p) | Payload::IdResp(p) => p.to_payload_data(),
            Payload::Cert(p) => p.to_payload_data(),
            Payload::CertReq(p) => p.to_payload_data(),
            Payload::Auth(p) => p.to_payload_data(),
            Payload::Nonce(p) => p.to_payload_data(),
            Payload::Notify(p) => p.to_payload_data(),
            Payload::Delete(p) => p.to_payload_data(),
            Payload::VendorId(p) => p.data.clone(),
            Payload::TsInit(p) | Payload::TsResp(p) => p.to_payload_data(),
            Payload::Sk(p) => p.data.clone(),
            Payload::Config(p) => p.to_payload_data(),
            Payload::Eap(p) => p.message.clone(),
            Payload::Unknown { data, .. } => data.clone(),
        }
    }
}
