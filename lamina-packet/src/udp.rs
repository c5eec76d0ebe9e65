//! UDP datagram codec

use std::net::IpAddr;

use bytes::{BufMut, BytesMut};

use lamina_core::{Error, IpNumber, Port, Result};

use crate::checksum::transport_checksum;
use crate::factory::PacketFactories;
use crate::packet::{BuilderPayload, Payload};

/// UDP header
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UdpHeader {
    /// Source port
    pub src_port: Port,
    /// Destination port
    pub dst_port: Port,
    /// Length of header plus payload in bytes
    pub length: u16,
    /// Checksum over the pseudo header, header, and payload; 0 means
    /// "no checksum" on the wire
    pub checksum: u16,
}

impl UdpHeader {
    /// Header size in bytes
    pub const LEN: usize = 8;

    /// Header length in bytes
    pub fn len(&self) -> usize {
        Self::LEN
    }

    /// Headers are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode the header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u16(self.src_port.value());
        buf.put_u16(self.dst_port.value());
        buf.put_u16(self.length);
        buf.put_u16(self.checksum);
        buf.to_vec()
    }
}

/// An immutable UDP datagram with its decoded payload chain
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UdpPacket {
    header: UdpHeader,
    payload: Payload,
}

impl UdpPacket {
    /// Decode a datagram, dispatching the payload by destination then
    /// source port
    pub fn from_bytes(raw: &[u8], factories: &PacketFactories) -> Result<Self> {
        if raw.len() < UdpHeader::LEN {
            return Err(Error::illegal_raw_data(format!(
                "UDP datagram too short: {} bytes, need {}",
                raw.len(),
                UdpHeader::LEN
            )));
        }

        let header = UdpHeader {
            src_port: Port::of(u16::from_be_bytes([raw[0], raw[1]])),
            dst_port: Port::of(u16::from_be_bytes([raw[2], raw[3]])),
            length: u16::from_be_bytes([raw[4], raw[5]]),
            checksum: u16::from_be_bytes([raw[6], raw[7]]),
        };

        let rest = &raw[UdpHeader::LEN..];
        // length 0 occurs with jumbograms; take the whole range
        let payload_len = if header.length == 0 {
            rest.len()
        } else {
            let length = header.length as usize;
            if length < UdpHeader::LEN {
                return Err(Error::illegal_raw_data(format!(
                    "UDP length {} smaller than the header",
                    length
                )));
            }
            (length - UdpHeader::LEN).min(rest.len())
        };

        let payload_raw = &rest[..payload_len];
        let payload = if payload_raw.is_empty() {
            Payload::None
        } else {
            factories.port().new_packet(
                payload_raw,
                factories,
                &[header.dst_port.clone(), header.src_port.clone()],
            )
        };

        Ok(Self { header, payload })
    }

    /// The datagram header
    pub fn header(&self) -> &UdpHeader {
        &self.header
    }

    /// The decoded payload chain
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Total datagram length in bytes
    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Datagrams are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes();
        bytes.extend_from_slice(&self.payload.to_bytes());
        bytes
    }

    /// A fresh builder with default fields
    pub fn builder() -> UdpBuilder {
        UdpBuilder::new()
    }

    /// A builder preloaded with this datagram's fields
    ///
    /// The pseudo-header addresses are not part of the wire datagram and
    /// come back unset; set them before enabling checksum correction.
    pub fn to_builder(&self) -> UdpBuilder {
        UdpBuilder {
            src_port: self.header.src_port.clone(),
            dst_port: self.header.dst_port.clone(),
            length: self.header.length,
            checksum: self.header.checksum,
            src_addr: None,
            dst_addr: None,
            payload: BuilderPayload::Packet(self.payload.clone()),
            correct_checksum_at_build: false,
            correct_length_at_build: false,
        }
    }
}

/// Builder for [`UdpPacket`]
///
/// The source and destination IP addresses are held only for the
/// pseudo-header checksum; they are not encoded into the datagram.
#[derive(Clone, Debug)]
pub struct UdpBuilder {
    src_port: Port,
    dst_port: Port,
    length: u16,
    checksum: u16,
    src_addr: Option<IpAddr>,
    dst_addr: Option<IpAddr>,
    payload: BuilderPayload,
    correct_checksum_at_build: bool,
    correct_length_at_build: bool,
}

impl UdpBuilder {
    /// A builder with length corrected at build
    pub fn new() -> Self {
        Self {
            src_port: Port::of(0),
            dst_port: Port::of(0),
            length: 0,
            checksum: 0,
            src_addr: None,
            dst_addr: None,
            payload: BuilderPayload::None,
            correct_checksum_at_build: false,
            correct_length_at_build: true,
        }
    }

    /// Set the source port
    pub fn src_port(mut self, port: Port) -> Self {
        self.src_port = port;
        self
    }

    /// Set the destination port
    pub fn dst_port(mut self, port: Port) -> Self {
        self.dst_port = port;
        self
    }

    /// Set the length field (ignored when length correction is on)
    pub fn length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    /// Set the checksum placeholder (ignored when checksum correction is on)
    pub fn checksum(mut self, checksum: u16) -> Self {
        self.checksum = checksum;
        self
    }

    /// Set the source IP address for the pseudo-header checksum
    pub fn src_addr(mut self, addr: IpAddr) -> Self {
        self.src_addr = Some(addr);
        self
    }

    /// Set the destination IP address for the pseudo-header checksum
    pub fn dst_addr(mut self, addr: IpAddr) -> Self {
        self.dst_addr = Some(addr);
        self
    }

    /// Use an already-built payload chain
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = BuilderPayload::Packet(payload);
        self
    }

    /// Nest a pending builder as the payload
    pub fn payload_builder(mut self, builder: impl Into<crate::packet::AnyBuilder>) -> Self {
        self.payload = BuilderPayload::Builder(Box::new(builder.into()));
        self
    }

    /// Compute the checksum at build time; requires both pseudo-header
    /// addresses
    pub fn correct_checksum_at_build(mut self, on: bool) -> Self {
        self.correct_checksum_at_build = on;
        self
    }

    /// Compute the length field at build time
    pub fn correct_length_at_build(mut self, on: bool) -> Self {
        self.correct_length_at_build = on;
        self
    }

    /// The nested payload slot
    pub fn payload_mut(&mut self) -> &mut BuilderPayload {
        &mut self.payload
    }

    /// Build the datagram
    ///
    /// A computed checksum of exactly 0 is transmitted as 0xffff, since 0
    /// means "no checksum" on the wire.
    pub fn build(&self) -> Result<UdpPacket> {
        let payload = self.payload.build()?;

        let length = if self.correct_length_at_build {
            let total = UdpHeader::LEN + payload.len();
            if total > u16::MAX as usize {
                return Err(Error::build(format!(
                    "datagram length {} exceeds the UDP length field",
                    total
                )));
            }
            total as u16
        } else {
            self.length
        };

        let mut header = UdpHeader {
            src_port: self.src_port.clone(),
            dst_port: self.dst_port.clone(),
            length,
            checksum: self.checksum,
        };

        if self.correct_checksum_at_build {
            let (src, dst) = match (self.src_addr, self.dst_addr) {
                (Some(src), Some(dst)) => (src, dst),
                _ => {
                    return Err(Error::build(
                        "UDP checksum correction needs src_addr and dst_addr",
                    ))
                }
            };
            header.checksum = 0;
            let mut datagram = header.to_bytes();
            datagram.extend_from_slice(&payload.to_bytes());
            let computed = transport_checksum(src, dst, &IpNumber::UDP, &datagram);
            header.checksum = if computed == 0 { 0xffff } else { computed };
        }

        Ok(UdpPacket { header, payload })
    }
}

impl Default for UdpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn decode(raw: &[u8], factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::Udp(Box::new(UdpPacket::from_bytes(
        raw, factories,
    )?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::PacketFactories;
    use crate::unknown::UnknownPacket;
    use std::net::Ipv4Addr;

    fn factories() -> PacketFactories {
        PacketFactories::statically_bound()
    }

    fn sample() -> UdpPacket {
        UdpBuilder::new()
            .src_port(Port::of(5353))
            .dst_port(Port::DNS)
            .payload(Payload::Unknown(UnknownPacket::new(&[1, 2, 3, 4])))
            .build()
            .unwrap()
    }

    #[test]
    fn test_length_correction() {
        assert_eq!(sample().header().length, 12);
    }

    #[test]
    fn test_roundtrip() {
        let datagram = sample();
        let bytes = datagram.to_bytes();
        let decoded = UdpPacket::from_bytes(&bytes, &factories()).unwrap();
        assert_eq!(datagram, decoded);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(UdpPacket::from_bytes(&[0u8; 7], &factories()).is_err());
    }

    #[test]
    fn test_bad_length_field_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[4] = 0;
        bytes[5] = 5; // below the 8-byte header
        assert!(UdpPacket::from_bytes(&bytes, &factories()).is_err());
    }

    #[test]
    fn test_checksum_zero_becomes_all_ones() {
        // Zero addresses and ports leave the sum at
        // 0x0011 (protocol) + 0x000a + 0x000a (length twice with a 2-byte
        // payload); the payload word 0xffda tops it up to exactly 0xffff,
        // whose complement is 0. The wire value must then be 0xffff.
        let datagram = UdpBuilder::new()
            .src_port(Port::of(0))
            .dst_port(Port::of(0))
            .src_addr(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .dst_addr(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .payload(Payload::Unknown(UnknownPacket::new(&[0xff, 0xda])))
            .correct_checksum_at_build(true)
            .build()
            .unwrap();
        assert_eq!(datagram.header().checksum, 0xffff);
    }

    #[test]
    fn test_checksum_validates_with_pseudo_header() {
        use crate::checksum::pseudo_header_checksum_v4;

        let src = Ipv4Addr::new(172, 16, 0, 1);
        let dst = Ipv4Addr::new(172, 16, 0, 2);
        let datagram = UdpBuilder::new()
            .src_port(Port::of(1024))
            .dst_port(Port::NTP)
            .src_addr(IpAddr::V4(src))
            .dst_addr(IpAddr::V4(dst))
            .payload(Payload::Unknown(UnknownPacket::new(b"ntp?")))
            .correct_checksum_at_build(true)
            .build()
            .unwrap();

        let mut wire = datagram.to_bytes();
        wire[6] = 0;
        wire[7] = 0;
        let expected = pseudo_header_checksum_v4(src, dst, &IpNumber::UDP, &wire);
        assert_eq!(datagram.header().checksum, expected);
    }

    #[test]
    fn test_checksum_needs_addresses() {
        let err = UdpBuilder::new()
            .correct_checksum_at_build(true)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("src_addr"));
    }
}
