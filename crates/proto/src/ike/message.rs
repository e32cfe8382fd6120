//! IKEv2 message framing and payload chain coding
//!
//! Implements the IKE message format defined in RFC 7296 Section 3.1.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Initiator's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Responder's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Message ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Length                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Payloads follow the header as a singly linked chain: each generic payload
//! header names the type of the *next* payload, and the last payload links
//! to 0. The SK (Encrypted and Authenticated) payload is terminal; its
//! next-payload field names the first payload of the *inner* encrypted
//! chain instead.

use super::constants::*;
use super::payload::Payload;
use crate::ike::{Error, Result};

/// IKE message header (28 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeHeader {
    /// Initiator's Security Parameter Index (8 bytes)
    pub initiator_spi: [u8; 8],

    /// Responder's Security Parameter Index (8 bytes, zero for the first
    /// IKE_SA_INIT request)
    pub responder_spi: [u8; 8],

    /// Type code of the first payload in the chain
    pub first_payload: u8,

    /// Protocol version (must be 0x20 for IKEv2)
    pub version: u8,

    /// Exchange type
    pub exchange_type: ExchangeType,

    /// Message flags
    pub flags: IkeFlags,

    /// Message ID (monotonic per direction, used for matching and replay)
    pub message_id: u32,

    /// Total message length in bytes (including header)
    pub length: u32,
}

impl IkeHeader {
    /// Create a new IKE header
    pub fn new(
        initiator_spi: [u8; 8],
        responder_spi: [u8; 8],
        first_payload: u8,
        exchange_type: ExchangeType,
        flags: IkeFlags,
        message_id: u32,
        length: u32,
    ) -> Self {
        IkeHeader {
            initiator_spi,
            responder_spi,
            first_payload,
            version: IKE_VERSION,
            exchange_type,
            flags,
            message_id,
            length,
        }
    }

    /// Parse an IKE header from bytes
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is too short (< 28 bytes)
    /// - Protocol version is not 0x20
    /// - Exchange type is unknown
    /// - Message length is out of bounds
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < IKE_HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: IKE_HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut initiator_spi = [0u8; 8];
        let mut responder_spi = [0u8; 8];
        initiator_spi.copy_from_slice(&data[0..8]);
        responder_spi.copy_from_slice(&data[8..16]);

        let first_payload = data[16];

        let version = data[17];
        if version != IKE_VERSION {
            return Err(Error::MalformedMessage(format!(
                "Unsupported IKE version: 0x{:02x}",
                version
            )));
        }

        let exchange_type = ExchangeType::from_u8(data[18]).ok_or_else(|| {
            Error::MalformedMessage(format!("Unknown exchange type: {}", data[18]))
        })?;

        let flags = IkeFlags::new(data[19]);

        let message_id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let length = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

        if length > MAX_IKE_MESSAGE_SIZE {
            return Err(Error::MalformedMessage(format!(
                "Message too large: {} bytes",
                length
            )));
        }

        if length < IKE_HEADER_SIZE as u32 {
            return Err(Error::InvalidLength {
                expected: IKE_HEADER_SIZE,
                actual: length as usize,
            });
        }

        Ok(IkeHeader {
            initiator_spi,
            responder_spi,
            first_payload,
            version,
            exchange_type,
            flags,
            message_id,
            length,
        })
    }

    /// Serialize the header to a 28-byte array
    pub fn to_bytes(&self) -> [u8; IKE_HEADER_SIZE] {
        let mut bytes = [0u8; IKE_HEADER_SIZE];

        bytes[0..8].copy_from_slice(&self.initiator_spi);
        bytes[8..16].copy_from_slice(&self.responder_spi);
        bytes[16] = self.first_payload;
        bytes[17] = self.version;
        bytes[18] = self.exchange_type.to_u8();
        bytes[19] = self.flags.value();
        bytes[20..24].copy_from_slice(&self.message_id.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.length.to_be_bytes());

        bytes
    }
}

/// A complete IKE message: header plus an ordered payload list.
///
/// The next-payload chain and all length fields are reconstructed from list
/// order at encode time, so `encode(decode(bytes)) == bytes` holds for any
/// message built from recognized payloads in canonical order.
#[derive(Debug, Clone, PartialEq)]
pub struct IkeMessage {
    /// Message header
    pub header: IkeHeader,

    /// Ordered payload list
    pub payloads: Vec<Payload>,
}

impl IkeMessage {
    /// Create a new message; header length and first-payload fields are
    /// fixed up at encode time.
    pub fn new(header: IkeHeader, payloads: Vec<Payload>) -> Self {
        IkeMessage { header, payloads }
    }

    /// Decode a full datagram into a message.
    ///
    /// The SK payload, when present, terminates the chain; its body is kept
    /// raw for the crypto session to authenticate and decrypt.
    ///
    /// # Errors
    ///
    /// - `MalformedMessage` if the header length disagrees with the buffer,
    ///   the chain cursor runs past the end, or trailing bytes remain
    /// - `UnsupportedPayload` if an unrecognized payload is marked critical
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = IkeHeader::from_bytes(data)?;

        if header.length as usize != data.len() {
            return Err(Error::MalformedMessage(format!(
                "Header length {} does not match datagram length {}",
                header.length,
                data.len()
            )));
        }

        let payloads = decode_payload_chain(header.first_payload, &data[IKE_HEADER_SIZE..])?;

        Ok(IkeMessage { header, payloads })
    }

    /// Encode the message to wire format.
    ///
    /// Rebuilds the next-payload chain from list order, then writes the
    /// total length into the header.
    pub fn encode(&self) -> Vec<u8> {
        let (first_payload, body) = encode_payload_chain(&self.payloads);

        let mut header = self.header.clone();
        header.first_payload = first_payload;
        header.length = (IKE_HEADER_SIZE + body.len()) as u32;

        let mut out = Vec::with_capacity(IKE_HEADER_SIZE + body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Find the first payload matching a predicate
    pub fn find_payload<F>(&self, pred: F) -> Option<&Payload>
    where
        F: Fn(&Payload) -> bool,
    {
        self.payloads.iter().find(|p| pred(p))
    }
}

/// Decode a payload chain starting with `first` from `data`.
///
/// Used both for the outer message body and for the decrypted contents of
/// an SK payload.
pub fn decode_payload_chain(first: u8, data: &[u8]) -> Result<Vec<Payload>> {
    let mut payloads = Vec::new();
    let mut current = first;
    let mut offset = 0usize;

    while current != 0 {
        if data.len() < offset + PAYLOAD_HEADER_SIZE {
            return Err(Error::MalformedMessage(format!(
                "Payload chain expects type {} but buffer is exhausted",
                current
            )));
        }

        let next = data[offset];
        let critical = (data[offset + 1] & 0x80) != 0;
        let length =
            u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;

        if length < PAYLOAD_HEADER_SIZE {
            return Err(Error::InvalidLength {
                expected: PAYLOAD_HEADER_SIZE,
                actual: length,
            });
        }
        if data.len() < offset + length {
            return Err(Error::BufferTooShort {
                required: offset + length,
                available: data.len(),
            });
        }

        let body = &data[offset + PAYLOAD_HEADER_SIZE..offset + length];

        if current == PayloadType::SK.to_u8() {
            // SK is terminal; its next-payload names the first inner payload.
            payloads.push(Payload::decode_sk(next, critical, body)?);
            offset += length;
            if offset != data.len() {
                return Err(Error::MalformedMessage(
                    "SK payload must be the last payload in the message".to_string(),
                ));
            }
            return Ok(payloads);
        }

        payloads.push(Payload::decode(current, critical, body)?);
        current = next;
        offset += length;
    }

    if offset != data.len() {
        return Err(Error::MalformedMessage(format!(
            "{} trailing bytes after last payload",
            data.len() - offset
        )));
    }

    Ok(payloads)
}

/// Encode a payload list into a chained body.
///
/// Returns the first-payload type code and the serialized bytes. The last
/// payload links to 0, except an SK payload whose next-payload field names
/// the first payload of its inner chain.
pub fn encode_payload_chain(payloads: &[Payload]) -> (u8, Vec<u8>) {
    let first = payloads
        .first()
        .map(|p| p.payload_type_code())
        .unwrap_or(0);

    let mut out = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        let next = match payload {
            Payload::Sk(sk) => sk.first_payload,
            _ => payloads
                .get(i + 1)
                .map(|p| p.payload_type_code())
                .unwrap_or(0),
        };

        let body = payload.to_payload_data();
        let length = (PAYLOAD_HEADER_SIZE + body.len()) as u16;

        out.push(next);
        out.push(if payload.is_critical() { 0x80 } else { 0x00 });
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&body);
    }

    (first, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ike::payload::{NoncePayload, NotifyPayload, NotifyType};

    fn sample_header(first_payload: u8, length: u32) -> IkeHeader {
        IkeHeader::new(
            [1, 2, 3, 4, 5, 6, 7, 8],
            [9, 10, 11, 12, 13, 14, 15, 16],
            first_payload,
            ExchangeType::IkeSaInit,
            IkeFlags::request(true),
            42,
            length,
        )
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header(PayloadType::SA.to_u8(), 100);
        let bytes = header.to_bytes();
        let parsed = IkeHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_header_parse_fields() {
        let mut data = vec![0u8; 28];
        data[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[16] = 33; // SA
        data[17] = 0x20;
        data[18] = 34; // IKE_SA_INIT
        data[19] = 0x08; // initiator
        data[20..24].copy_from_slice(&7u32.to_be_bytes());
        data[24..28].copy_from_slice(&28u32.to_be_bytes());

        let header = IkeHeader::from_bytes(&data).unwrap();
        assert_eq!(header.initiator_spi, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(header.first_payload, 33);
        assert_eq!(header.exchange_type, ExchangeType::IkeSaInit);
        assert!(header.flags.is_initiator());
        assert!(!header.flags.is_response());
        assert_eq!(header.message_id, 7);
        assert_eq!(header.length, 28);
    }

    #[test]
    fn test_header_buffer_too_short() {
        let data = vec![0u8; 27];
        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::BufferTooShort { .. })));
    }

    #[test]
    fn test_header_invalid_version() {
        let mut data = vec![0u8; 28];
        data[17] = 0x10;
        data[18] = 34;
        data[24..28].copy_from_slice(&28u32.to_be_bytes());

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_header_unknown_exchange_type() {
        let mut data = vec![0u8; 28];
        data[17] = 0x20;
        data[18] = 99;
        data[24..28].copy_from_slice(&28u32.to_be_bytes());

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_message_roundtrip() {
        let nonce = NoncePayload::new(vec![0xAB; 32]).unwrap();
        let notify = NotifyPayload::status(NotifyType::InitialContact, Vec::new());
        let msg = IkeMessage::new(
            sample_header(0, 0),
            vec![Payload::Nonce(nonce), Payload::Notify(notify)],
        );

        let bytes = msg.encode();
        let decoded = IkeMessage::decode(&bytes).unwrap();

        assert_eq!(decoded.payloads, msg.payloads);
        assert_eq!(decoded.header.length as usize, bytes.len());
        assert_eq!(decoded.header.first_payload, PayloadType::Nonce.to_u8());

        // Round-trip law
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_message_length_mismatch() {
        let nonce = NoncePayload::new(vec![0xAB; 32]).unwrap();
        let msg = IkeMessage::new(sample_header(0, 0), vec![Payload::Nonce(nonce)]);

        let mut bytes = msg.encode();
        // Claim a longer message than we deliver
        let bad_len = (bytes.len() as u32 + 4).to_be_bytes();
        bytes[24..28].copy_from_slice(&bad_len);

        let result = IkeMessage::decode(&bytes);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_chain_trailing_bytes_rejected() {
        let nonce = NoncePayload::new(vec![0xAB; 16]).unwrap();
        let (first, mut body) = encode_payload_chain(&[Payload::Nonce(nonce)]);
        body.extend_from_slice(&[0u8; 3]);

        let result = decode_payload_chain(first, &body);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_chain_exhaustion_rejected() {
        // Chain claims a payload follows, but the buffer ends.
        let result = decode_payload_chain(PayloadType::Nonce.to_u8(), &[]);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_unknown_critical_payload_rejected() {
        // Payload type 53 marked critical
        let body = [0u8, 0x80, 0, 8, 1, 2, 3, 4];
        let result = decode_payload_chain(53, &body);
        assert!(matches!(result, Err(Error::UnsupportedPayload(53))));
    }

    #[test]
    fn test_unknown_noncritical_payload_preserved() {
        let body = [0u8, 0x00, 0, 8, 1, 2, 3, 4];
        let payloads = decode_payload_chain(53, &body).unwrap();
        assert_eq!(payloads.len(), 1);
        match &payloads[0] {
            Payload::Unknown { payload_type, data, .. } => {
                assert_eq!(*payload_type, 53);
                assert_eq!(data, &[1, 2, 3, 4]);
            }
            other => panic!("Expected Unknown payload, got {:?}", other),
        }

        // And it re-encodes byte-identically
        let (first, encoded) = encode_payload_chain(&payloads);
        assert_eq!(first, 53);
        assert_eq!(encoded, body);
    }
}
