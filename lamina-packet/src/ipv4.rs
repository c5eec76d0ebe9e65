//! IPv4 packet codec

use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use lamina_core::{Error, IpNumber, IpVersion, Result};

use crate::checksum::internet_checksum;
use crate::factory::PacketFactories;
use crate::packet::{BuilderPayload, Payload};
use crate::unknown::UnknownPacket;

/// IPv4 header
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv4Header {
    /// IP version, 4
    pub version: IpVersion,
    /// Internet Header Length in 32-bit words, at least 5
    pub ihl: u8,
    /// Type of Service / DSCP+ECN
    pub tos: u8,
    /// Total length of header plus payload in bytes
    pub total_length: u16,
    /// Identification, shared by all fragments of one datagram
    pub identification: u16,
    /// Reserved flag bit, must be zero on the wire
    pub reserved_flag: bool,
    /// Don't Fragment flag
    pub dont_fragment_flag: bool,
    /// More Fragments flag
    pub more_fragment_flag: bool,
    /// Fragment offset in 8-byte units (13-bit field)
    pub fragment_offset: u16,
    /// Time to live
    pub ttl: u8,
    /// Payload protocol number
    pub protocol: IpNumber,
    /// Header checksum
    pub header_checksum: u16,
    /// Source address
    pub src_addr: Ipv4Addr,
    /// Destination address
    pub dst_addr: Ipv4Addr,
    /// Options, already padded to a 32-bit boundary
    pub options: Vec<u8>,
}

impl Ipv4Header {
    /// Minimum header size in bytes (no options)
    pub const MIN_LEN: usize = 20;

    /// Maximum header size in bytes (IHL is 4 bits)
    pub const MAX_LEN: usize = 60;

    /// Header length in bytes as actually encoded
    pub fn len(&self) -> usize {
        Self::MIN_LEN + self.options.len()
    }

    /// Headers are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Fragment offset converted to a byte count
    pub fn fragment_byte_offset(&self) -> usize {
        self.fragment_offset as usize * 8
    }

    /// True when this header belongs to a fragment of a larger datagram
    pub fn is_fragmented(&self) -> bool {
        self.fragment_offset != 0 || self.more_fragment_flag
    }

    /// Encode the header with the stored checksum
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.len());
        buf.put_u8((self.version.value() << 4) | (self.ihl & 0x0f));
        buf.put_u8(self.tos);
        buf.put_u16(self.total_length);
        buf.put_u16(self.identification);

        let mut flags = 0u16;
        if self.reserved_flag {
            flags |= 0b100;
        }
        if self.dont_fragment_flag {
            flags |= 0b010;
        }
        if self.more_fragment_flag {
            flags |= 0b001;
        }
        buf.put_u16((flags << 13) | (self.fragment_offset & 0x1fff));

        buf.put_u8(self.ttl);
        buf.put_u8(self.protocol.value());
        buf.put_u16(self.header_checksum);
        buf.put_slice(&self.src_addr.octets());
        buf.put_slice(&self.dst_addr.octets());
        buf.put_slice(&self.options);
        buf.to_vec()
    }
}

/// An immutable IPv4 packet with its decoded payload chain
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv4Packet {
    header: Ipv4Header,
    payload: Payload,
}

impl Ipv4Packet {
    /// Decode a packet, dispatching the payload by protocol number
    ///
    /// A fragment's payload (nonzero offset or More Fragments set) is kept
    /// as raw unknown bytes; it only becomes decodable after
    /// defragmentation.
    pub fn from_bytes(raw: &[u8], factories: &PacketFactories) -> Result<Self> {
        if raw.len() < Ipv4Header::MIN_LEN {
            return Err(Error::illegal_raw_data(format!(
                "IPv4 packet too short: {} bytes, need {}",
                raw.len(),
                Ipv4Header::MIN_LEN
            )));
        }

        let version = raw[0] >> 4;
        if version != 4 {
            return Err(Error::illegal_raw_data(format!(
                "not an IPv4 header: version {}",
                version
            )));
        }

        let ihl = raw[0] & 0x0f;
        let header_len = ihl as usize * 4;
        if header_len < Ipv4Header::MIN_LEN {
            return Err(Error::illegal_raw_data(format!(
                "IPv4 IHL {} smaller than minimum header size",
                ihl
            )));
        }
        if raw.len() < header_len {
            return Err(Error::illegal_raw_data(format!(
                "IPv4 header truncated: IHL says {} bytes, got {}",
                header_len,
                raw.len()
            )));
        }

        let total_length = u16::from_be_bytes([raw[2], raw[3]]);
        // total length 0 occurs with TSO captures; take the whole range
        let payload_end = if total_length == 0 {
            raw.len()
        } else {
            let total = total_length as usize;
            if total < header_len {
                return Err(Error::illegal_raw_data(format!(
                    "IPv4 total length {} smaller than header length {}",
                    total, header_len
                )));
            }
            total.min(raw.len())
        };

        let flags_and_offset = u16::from_be_bytes([raw[6], raw[7]]);
        let flags = (flags_and_offset >> 13) as u8;

        let header = Ipv4Header {
            version: IpVersion::IPV4,
            ihl,
            tos: raw[1],
            total_length,
            identification: u16::from_be_bytes([raw[4], raw[5]]),
            reserved_flag: flags & 0b100 != 0,
            dont_fragment_flag: flags & 0b010 != 0,
            more_fragment_flag: flags & 0b001 != 0,
            fragment_offset: flags_and_offset & 0x1fff,
            ttl: raw[8],
            protocol: IpNumber::of(raw[9]),
            header_checksum: u16::from_be_bytes([raw[10], raw[11]]),
            src_addr: Ipv4Addr::new(raw[12], raw[13], raw[14], raw[15]),
            dst_addr: Ipv4Addr::new(raw[16], raw[17], raw[18], raw[19]),
            options: raw[Ipv4Header::MIN_LEN..header_len].to_vec(),
        };

        let payload_raw = &raw[header_len..payload_end];
        let payload = if payload_raw.is_empty() {
            Payload::None
        } else if header.is_fragmented() {
            Payload::Unknown(UnknownPacket::new(payload_raw))
        } else {
            factories
                .ip_number()
                .new_packet(payload_raw, factories, &[header.protocol.clone()])
        };

        Ok(Self { header, payload })
    }

    /// The packet header
    pub fn header(&self) -> &Ipv4Header {
        &self.header
    }

    /// The decoded payload chain
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Total packet length in bytes
    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Packets are never empty
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
    pub fn builder() -> Ipv4Builder {
        Ipv4Builder::new()
    }

    /// A builder preloaded with this packet's fields
    pub fn to_builder(&self) -> Ipv4Builder {
        Ipv4Builder {
            ihl: self.header.ihl,
            tos: self.header.tos,
            total_length: self.header.total_length,
            identification: self.header.identification,
            reserved_flag: self.header.reserved_flag,
            dont_fragment_flag: self.header.dont_fragment_flag,
            more_fragment_flag: self.header.more_fragment_flag,
            fragment_offset: self.header.fragment_offset,
            ttl: self.header.ttl,
            protocol: self.header.protocol.clone(),
            header_checksum: self.header.header_checksum,
            src_addr: self.header.src_addr,
            dst_addr: self.header.dst_addr,
            options: self.header.options.clone(),
            payload: BuilderPayload::Packet(self.payload.clone()),
            correct_checksum_at_build: false,
            correct_length_at_build: false,
        }
    }
}

/// Builder for [`Ipv4Packet`]
#[derive(Clone, Debug)]
pub struct Ipv4Builder {
    ihl: u8,
    tos: u8,
    total_length: u16,
    identification: u16,
    reserved_flag: bool,
    dont_fragment_flag: bool,
    more_fragment_flag: bool,
    fragment_offset: u16,
    ttl: u8,
    protocol: IpNumber,
    header_checksum: u16,
    src_addr: Ipv4Addr,
    dst_addr: Ipv4Addr,
    options: Vec<u8>,
    payload: BuilderPayload,
    correct_checksum_at_build: bool,
    correct_length_at_build: bool,
}

impl Ipv4Builder {
    /// A builder with sensible defaults: IHL 5, TTL 64, UDP protocol,
    /// length and checksum corrected at build
    pub fn new() -> Self {
        Self {
            ihl: 5,
            tos: 0,
            total_length: 0,
            identification: 0,
            reserved_flag: false,
            dont_fragment_flag: false,
            more_fragment_flag: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: IpNumber::UDP,
            header_checksum: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            options: Vec::new(),
            payload: BuilderPayload::None,
            correct_checksum_at_build: true,
            correct_length_at_build: true,
        }
    }

    /// Set the IHL field (ignored when length correction is on)
    pub fn ihl(mut self, ihl: u8) -> Self {
        self.ihl = ihl;
        self
    }

    /// Set the Type of Service byte
    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    /// Set the total length field (ignored when length correction is on)
    pub fn total_length(mut self, total_length: u16) -> Self {
        self.total_length = total_length;
        self
    }

    /// Set the identification field
    pub fn identification(mut self, identification: u16) -> Self {
        self.identification = identification;
        self
    }

    /// Set the reserved flag bit
    pub fn reserved_flag(mut self, on: bool) -> Self {
        self.reserved_flag = on;
        self
    }

    /// Set the Don't Fragment flag
    pub fn dont_fragment_flag(mut self, on: bool) -> Self {
        self.dont_fragment_flag = on;
        self
    }

    /// Set the More Fragments flag
    pub fn more_fragment_flag(mut self, on: bool) -> Self {
        self.more_fragment_flag = on;
        self
    }

    /// Set the fragment offset in 8-byte units
    pub fn fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset;
        self
    }

    /// Set the TTL
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the payload protocol number
    pub fn protocol(mut self, protocol: IpNumber) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the header checksum placeholder (ignored when checksum
    /// correction is on)
    pub fn header_checksum(mut self, checksum: u16) -> Self {
        self.header_checksum = checksum;
        self
    }

    /// Set the source address
    pub fn src_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_addr = addr;
        self
    }

    /// Set the destination address
    pub fn dst_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_addr = addr;
        self
    }

    /// Set the options bytes; must already be padded to 32 bits
    pub fn options(mut self, options: Vec<u8>) -> Self {
        self.options = options;
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

    /// Compute the header checksum at build time
    pub fn correct_checksum_at_build(mut self, on: bool) -> Self {
        self.correct_checksum_at_build = on;
        self
    }

    /// Compute IHL and total length at build time
    pub fn correct_length_at_build(mut self, on: bool) -> Self {
        self.correct_length_at_build = on;
        self
    }

    /// The nested payload slot
    pub fn payload_mut(&mut self) -> &mut BuilderPayload {
        &mut self.payload
    }

    /// Build the packet
    ///
    /// The payload chain is built first; derived fields (lengths, then the
    /// checksum) are computed over the finished view when the corresponding
    /// correction flag is set.
    pub fn build(&self) -> Result<Ipv4Packet> {
        if self.options.len() % 4 != 0 {
            return Err(Error::invalid_field(
                "options",
                "must be padded to a 32-bit boundary",
            ));
        }
        if Ipv4Header::MIN_LEN + self.options.len() > Ipv4Header::MAX_LEN {
            return Err(Error::invalid_field("options", "longer than 40 bytes"));
        }
        if self.fragment_offset > 0x1fff {
            return Err(Error::invalid_field(
                "fragment_offset",
                "exceeds 13-bit field",
            ));
        }

        let payload = self.payload.build()?;
        let header_len = Ipv4Header::MIN_LEN + self.options.len();

        let (ihl, total_length) = if self.correct_length_at_build {
            let total = header_len + payload.len();
            if total > u16::MAX as usize {
                return Err(Error::build(format!(
                    "packet length {} exceeds the IPv4 total length field",
                    total
                )));
            }
            ((header_len / 4) as u8, total as u16)
        } else {
            if self.ihl < 5 {
                return Err(Error::invalid_field("ihl", "must be at least 5"));
            }
            (self.ihl, self.total_length)
        };

        let mut header = Ipv4Header {
            version: IpVersion::IPV4,
            ihl,
            tos: self.tos,
            total_length,
            identification: self.identification,
            reserved_flag: self.reserved_flag,
            dont_fragment_flag: self.dont_fragment_flag,
            more_fragment_flag: self.more_fragment_flag,
            fragment_offset: self.fragment_offset,
            ttl: self.ttl,
            protocol: self.protocol.clone(),
            header_checksum: self.header_checksum,
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
            options: self.options.clone(),
        };

        if self.correct_checksum_at_build {
            header.header_checksum = 0;
            header.header_checksum = internet_checksum(&header.to_bytes());
        }

        Ok(Ipv4Packet { header, payload })
    }
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn decode(raw: &[u8], factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::Ipv4(Box::new(Ipv4Packet::from_bytes(
        raw, factories,
    )?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::validate_checksum;
    use crate::factory::PacketFactories;

    fn factories() -> PacketFactories {
        PacketFactories::statically_bound()
    }

    fn sample() -> Ipv4Packet {
        // protocol 253 is reserved for experimentation and has no decoder
        // bound, so the 4-byte payload stays unknown across a round trip
        Ipv4Builder::new()
            .identification(0x1234)
            .ttl(64)
            .protocol(IpNumber::of(253))
            .src_addr(Ipv4Addr::new(192, 168, 1, 1))
            .dst_addr(Ipv4Addr::new(192, 168, 1, 2))
            .payload(Payload::Unknown(UnknownPacket::new(&[1, 2, 3, 4])))
            .build()
            .unwrap()
    }

    #[test]
    fn test_length_correction() {
        let packet = sample();
        assert_eq!(packet.header().ihl, 5);
        assert_eq!(packet.header().total_length, 24);
        assert_eq!(packet.len(), 24);
    }

    #[test]
    fn test_checksum_correction_validates() {
        let packet = sample();
        assert_ne!(packet.header().header_checksum, 0);
        // summing the header including its checksum must come out clean
        assert!(validate_checksum(&packet.header().to_bytes()));
    }

    #[test]
    fn test_roundtrip() {
        let packet = sample();
        let bytes = packet.to_bytes();
        let decoded = Ipv4Packet::from_bytes(&bytes, &factories()).unwrap();
        assert_eq!(packet, decoded);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0x65; // version 6
        assert!(Ipv4Packet::from_bytes(&bytes, &factories()).is_err());
    }

    #[test]
    fn test_ihl_below_minimum_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0x44; // IHL 4 -> 16-byte header
        let err = Ipv4Packet::from_bytes(&bytes, &factories()).unwrap_err();
        assert!(err.to_string().contains("IHL"));
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(Ipv4Packet::from_bytes(&[0x45; 19], &factories()).is_err());
    }

    #[test]
    fn test_fragment_payload_stays_raw() {
        let packet = Ipv4Builder::new()
            .protocol(IpNumber::UDP)
            .more_fragment_flag(true)
            .payload(Payload::Unknown(UnknownPacket::new(&[0xAA; 16])))
            .build()
            .unwrap();
        let decoded = Ipv4Packet::from_bytes(&packet.to_bytes(), &factories()).unwrap();
        // despite protocol=UDP the fragment payload must not be parsed
        assert!(matches!(decoded.payload(), Payload::Unknown(_)));
    }

    #[test]
    fn test_odd_options_rejected() {
        let err = Ipv4Builder::new()
            .options(vec![0x01, 0x02, 0x03])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("32-bit"));
    }

    #[test]
    fn test_supplied_lengths_kept_verbatim() {
        let packet = Ipv4Builder::new()
            .correct_length_at_build(false)
            .correct_checksum_at_build(false)
            .ihl(5)
            .total_length(999)
            .header_checksum(0xdead)
            .build()
            .unwrap();
        assert_eq!(packet.header().total_length, 999);
        assert_eq!(packet.header().header_checksum, 0xdead);
    }

    #[test]
    fn test_to_builder_single_field_change() {
        let packet = sample();
        let changed = packet
            .to_builder()
            .ttl(31)
            .correct_checksum_at_build(true)
            .build()
            .unwrap();
        assert_eq!(changed.header().ttl, 31);
        assert_eq!(changed.payload(), packet.payload());
        assert_eq!(changed.header().identification, 0x1234);
        // checksum was recomputed for the new TTL
        assert!(validate_checksum(&changed.header().to_bytes()));
        assert_ne!(
            changed.header().header_checksum,
            packet.header().header_checksum
        );
    }
}
