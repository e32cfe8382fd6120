//! Traffic Selector coding (RFC 7296 Section 3.13)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   TS Type     |IP Protocol ID*|       Selector Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Start Port*         |           End Port*           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! ~                         Starting Address*                     ~
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! ~                         Ending Address*                       ~
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A v4 selector is exactly 16 bytes, a v6 selector exactly 40. Port and
//! address ranges are validated on construction and on decode.

use std::net::IpAddr;

use crate::ike::{Error, Result};

/// TS_IPV4_ADDR_RANGE
pub const TS_TYPE_IPV4_ADDR_RANGE: u8 = 7;
/// TS_IPV6_ADDR_RANGE
pub const TS_TYPE_IPV6_ADDR_RANGE: u8 = 8;

/// Encoded length of an IPv4 selector
pub const TS_IPV4_LEN: usize = 16;
/// Encoded length of an IPv6 selector
pub const TS_IPV6_LEN: usize = 40;

// IP protocol IDs re-defined by IKE: 0 means all protocols are acceptable.
const IP_PROTOCOL_IDS: [u8; 4] = [0, 1, 6, 17];

/// A single traffic selector: an (address range, port range, protocol)
/// triple of one address family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSelector {
    /// IP protocol ID (0 = any, 1 = ICMP, 6 = TCP, 17 = UDP)
    pub ip_protocol_id: u8,

    /// Smallest port covered
    pub start_port: u16,

    /// Largest port covered
    pub end_port: u16,

    /// Smallest address covered
    pub start_address: IpAddr,

    /// Largest address covered
    pub end_address: IpAddr,
}

impl TrafficSelector {
    /// Create a selector covering an address range on all ports.
    pub fn new(start_address: IpAddr, end_address: IpAddr) -> Result<Self> {
        Self::with_ports(start_address, end_address, 0, 65535)
    }

    /// Create a selector with an explicit port range.
    pub fn with_ports(
        start_address: IpAddr,
        end_address: IpAddr,
        start_port: u16,
        end_port: u16,
    ) -> Result<Self> {
        let ts = TrafficSelector {
            ip_protocol_id: 0,
            start_port,
            end_port,
            start_address,
            end_address,
        };
        ts.validate()?;
        Ok(ts)
    }

    /// TS type code for this selector's address family
    pub fn ts_type(&self) -> u8 {
        match self.start_address {
            IpAddr::V4(_) => TS_TYPE_IPV4_ADDR_RANGE,
            IpAddr::V6(_) => TS_TYPE_IPV6_ADDR_RANGE,
        }
    }

    /// Encoded selector length (16 for v4, 40 for v6)
    pub fn selector_length(&self) -> usize {
        match self.start_address {
            IpAddr::V4(_) => TS_IPV4_LEN,
            IpAddr::V6(_) => TS_IPV6_LEN,
        }
    }

    /// Whether this selector uses IPv6 addresses
    pub fn is_ipv6(&self) -> bool {
        self.start_address.is_ipv6()
    }

    fn validate(&self) -> Result<()> {
        if !IP_PROTOCOL_IDS.contains(&self.ip_protocol_id) {
            return Err(Error::InvalidSyntax(format!(
                "Invalid IP protocol ID: {}",
                self.ip_protocol_id
            )));
        }

        if self.start_port > self.end_port {
            return Err(Error::InvalidSyntax(format!(
                "Invalid port range: {} > {}",
                self.start_port, self.end_port
            )));
        }

        let (start, end) = (addr_bytes(self.start_address), addr_bytes(self.end_address));
        if start.len() != end.len() {
            return Err(Error::InvalidSyntax(
                "Traffic selector addresses are different families".to_string(),
            ));
        }
        if start > end {
            return Err(Error::InvalidSyntax(format!(
                "Invalid address range: {} > {}",
                self.start_address, self.end_address
            )));
        }

        Ok(())
    }

    /// Decode one selector from `data`, returning it and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 8 {
            return Err(Error::BufferTooShort {
                required: 8,
                available: data.len(),
            });
        }

        let ts_type = data[0];
        let ip_protocol_id = data[1];
        let selector_length = u16::from_be_bytes([data[2], data[3]]) as usize;
        let start_port = u16::from_be_bytes([data[4], data[5]]);
        let end_port = u16::from_be_bytes([data[6], data[7]]);

        let addr_len = match ts_type {
            TS_TYPE_IPV4_ADDR_RANGE => {
                if selector_length != TS_IPV4_LEN {
                    return Err(Error::InvalidSyntax(format!(
                        "Invalid IPv4 selector length: {}",
                        selector_length
                    )));
                }
                4
            }
            TS_TYPE_IPV6_ADDR_RANGE => {
                if selector_length != TS_IPV6_LEN {
                    return Err(Error::InvalidSyntax(format!(
                        "Invalid IPv6 selector length: {}",
                        selector_length
                    )));
                }
                16
            }
            other => {
                return Err(Error::InvalidSyntax(format!(
                    "Invalid traffic selector type: {}",
                    other
                )))
            }
        };

        if data.len() < selector_length {
            return Err(Error::BufferTooShort {
                required: selector_length,
                available: data.len(),
            });
        }

        let start_address = decode_addr(&data[8..8 + addr_len]);
        let end_address = decode_addr(&data[8 + addr_len..8 + 2 * addr_len]);

        let ts = TrafficSelector {
            ip_protocol_id,
            start_port,
            end_port,
            start_address,
            end_address,
        };
        ts.validate()?;

        Ok((ts, selector_length))
    }

    /// Encode the selector; output is exactly 16 (v4) or 40 (v6) bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.selector_length());
        out.push(self.ts_type());
        out.push(self.ip_protocol_id);
        out.extend_from_slice(&(self.selector_length() as u16).to_be_bytes());
        out.extend_from_slice(&self.start_port.to_be_bytes());
        out.extend_from_slice(&self.end_port.to_be_bytes());
        out.extend_from_slice(&addr_bytes(self.start_address));
        out.extend_from_slice(&addr_bytes(self.end_address));
        out
    }
}

fn addr_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(a) => a.octets().to_vec(),
        IpAddr::V6(a) => a.octets().to_vec(),
    }
}

fn decode_addr(bytes: &[u8]) -> IpAddr {
    if bytes.len() == 4 {
        let octets: [u8; 4] = bytes.try_into().expect("length checked");
        IpAddr::V4(octets.into())
    } else {
        let octets: [u8; 16] = bytes.try_into().expect("length checked");
        IpAddr::V6(octets.into())
    }
}

/// Traffic Selector payload (TSi / TSr) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPayload {
    /// Selector list (at least one)
    pub selectors: Vec<TrafficSelector>,
}

impl TsPayload {
    /// Create from a selector list
    pub fn new(selectors: Vec<TrafficSelector>) -> Result<Self> {
        if selectors.is_empty() {
            return Err(Error::InvalidSyntax(
                "Traffic selector payload needs at least one selector".to_string(),
            ));
        }
        Ok(TsPayload { selectors })
    }

    /// True if every selector in the payload is IPv6
    pub fn is_ipv6_only(&self) -> bool {
        self.selectors.iter().all(|ts| ts.is_ipv6())
    }

    /// Parse from payload body
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let count = data[0] as usize;
        // Bytes 1-3 are reserved
        let mut selectors = Vec::with_capacity(count);
        let mut offset = 4usize;

        for _ in 0..count {
            let (ts, consumed) = TrafficSelector::decode(&data[offset..])?;
            selectors.push(ts);
            offset += consumed;
        }

        if offset != data.len() {
            return Err(Error::MalformedMessage(format!(
                "{} trailing bytes after {} traffic selectors",
                data.len() - offset,
                count
            )));
        }

        Self::new(selectors)
    }

    /// Serialize to payload body
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut out = vec![self.selectors.len() as u8, 0, 0, 0];
        for ts in &self.selectors {
            out.extend_from_slice(&ts.encode());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn v6(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_selector_encode_length() {
        let ts = TrafficSelector::new(v4("10.0.0.0"), v4("10.0.0.255")).unwrap();
        assert_eq!(ts.encode().len(), TS_IPV4_LEN);

        let ts = TrafficSelector::new(v6("fd00::1"), v6("fd00::ff")).unwrap();
        assert_eq!(ts.encode().len(), TS_IPV6_LEN);
    }

    #[test]
    fn test_selector_roundtrip() {
        let ts =
            TrafficSelector::with_ports(v4("192.168.1.1"), v4("192.168.1.100"), 80, 443)
                .unwrap();
        let encoded = ts.encode();
        let (decoded, consumed) = TrafficSelector::decode(&encoded).unwrap();
        assert_eq!(consumed, TS_IPV4_LEN);
        assert_eq!(decoded, ts);
    }

    #[test]
    fn test_selector_ipv6_roundtrip() {
        let ts = TrafficSelector::new(v6("2001:db8::1"), v6("2001:db8::ffff")).unwrap();
        let encoded = ts.encode();
        let (decoded, consumed) = TrafficSelector::decode(&encoded).unwrap();
        assert_eq!(consumed, TS_IPV6_LEN);
        assert_eq!(decoded, ts);
    }

    #[test]
    fn test_invalid_port_range() {
        let result = TrafficSelector::with_ports(v4("10.0.0.1"), v4("10.0.0.2"), 443, 80);
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_invalid_address_range_rejected_on_decode() {
        // start = 10.0.0.5, end = 10.0.0.1
        let ts = TrafficSelector {
            ip_protocol_id: 0,
            start_port: 0,
            end_port: 65535,
            start_address: v4("10.0.0.5"),
            end_address: v4("10.0.0.1"),
        };
        let encoded = ts.encode();
        let result = TrafficSelector::decode(&encoded);
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_mixed_family_rejected() {
        let ts = TrafficSelector {
            ip_protocol_id: 0,
            start_port: 0,
            end_port: 65535,
            start_address: v4("10.0.0.1"),
            end_address: v6("fd00::1"),
        };
        assert!(ts.validate().is_err());
    }

    #[test]
    fn test_invalid_protocol_id() {
        let ts = TrafficSelector {
            ip_protocol_id: 50,
            start_port: 0,
            end_port: 65535,
            start_address: v4("10.0.0.1"),
            end_address: v4("10.0.0.2"),
        };
        assert!(matches!(ts.validate(), Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_wrong_selector_length_field() {
        let ts = TrafficSelector::new(v4("10.0.0.1"), v4("10.0.0.2")).unwrap();
        let mut encoded = ts.encode();
        encoded[3] = 17; // claim 17 instead of 16
        let result = TrafficSelector::decode(&encoded);
        assert!(matches!(result, Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn test_ts_payload_roundtrip() {
        let payload = TsPayload::new(vec![
            TrafficSelector::new(v4("10.0.0.0"), v4("10.255.255.255")).unwrap(),
            TrafficSelector::with_ports(v4("172.16.0.1"), v4("172.16.0.1"), 500, 500)
                .unwrap(),
        ])
        .unwrap();

        let data = payload.to_payload_data();
        assert_eq!(data[0], 2);

        let parsed = TsPayload::from_payload_data(&data).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_ts_payload_trailing_bytes_rejected() {
        let payload = TsPayload::new(vec![TrafficSelector::new(
            v4("10.0.0.0"),
            v4("10.0.0.255"),
        )
        .unwrap()])
        .unwrap();

        let mut data = payload.to_payload_data();
        data.push(0);

        let result = TsPayload::from_payload_data(&data);
        assert!(matches!(result, Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_ts_payload_ipv6_only() {
        let payload = TsPayload::new(vec![TrafficSelector::new(
            v6("fd00::"),
            v6("fd00::ff"),
        )
        .unwrap()])
        .unwrap();
        assert!(payload.is_ipv6_only());

        let mixed = TsPayload::new(vec![
            TrafficSelector::new(v6("fd00::"), v6("fd00::ff")).unwrap(),
            TrafficSelector::new(v4("10.0.0.0"), v4("10.0.0.1")).unwrap(),
        ])
        .unwrap();
        assert!(!mixed.is_ipv6_only());
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(TsPayload::new(Vec::new()).is_err());
    }
}
