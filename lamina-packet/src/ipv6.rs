//! IPv6 packet codec: fixed header and the fragment extension header

use std::net::Ipv6Addr;

use bytes::{BufMut, BytesMut};

use lamina_core::{Error, IpNumber, IpVersion, Result};

use crate::factory::PacketFactories;
use crate::packet::{BuilderPayload, Payload};
use crate::unknown::UnknownPacket;

/// IPv6 fixed header
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv6Header {
    /// IP version, 6
    pub version: IpVersion,
    /// Traffic class
    pub traffic_class: u8,
    /// Flow label (20-bit field)
    pub flow_label: u32,
    /// Payload length in bytes, extension headers included
    pub payload_length: u16,
    /// Next header protocol number
    pub next_header: IpNumber,
    /// Hop limit
    pub hop_limit: u8,
    /// Source address
    pub src_addr: Ipv6Addr,
    /// Destination address
    pub dst_addr: Ipv6Addr,
}

impl Ipv6Header {
    /// Fixed header size in bytes
    pub const LEN: usize = 40;

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
        buf.put_u8((self.version.value() << 4) | ((self.traffic_class >> 4) & 0x0f));
        buf.put_u8(((self.traffic_class & 0x0f) << 4) | ((self.flow_label >> 16) as u8 & 0x0f));
        buf.put_u16((self.flow_label & 0xffff) as u16);
        buf.put_u16(self.payload_length);
        buf.put_u8(self.next_header.value());
        buf.put_u8(self.hop_limit);
        buf.put_slice(&self.src_addr.octets());
        buf.put_slice(&self.dst_addr.octets());
        buf.to_vec()
    }
}

/// An immutable IPv6 packet with its decoded payload chain
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv6Packet {
    header: Ipv6Header,
    payload: Payload,
}

impl Ipv6Packet {
    /// Decode a packet, dispatching the payload by next-header number
    pub fn from_bytes(raw: &[u8], factories: &PacketFactories) -> Result<Self> {
        if raw.len() < Ipv6Header::LEN {
            return Err(Error::illegal_raw_data(format!(
                "IPv6 packet too short: {} bytes, need {}",
                raw.len(),
                Ipv6Header::LEN
            )));
        }

        let version = raw[0] >> 4;
        if version != 6 {
            return Err(Error::illegal_raw_data(format!(
                "not an IPv6 header: version {}",
                version
            )));
        }

        let mut src = [0u8; 16];
        src.copy_from_slice(&raw[8..24]);
        let mut dst = [0u8; 16];
        dst.copy_from_slice(&raw[24..40]);

        let header = Ipv6Header {
            version: IpVersion::IPV6,
            traffic_class: ((raw[0] & 0x0f) << 4) | (raw[1] >> 4),
            flow_label: (((raw[1] & 0x0f) as u32) << 16) | ((raw[2] as u32) << 8) | raw[3] as u32,
            payload_length: u16::from_be_bytes([raw[4], raw[5]]),
            next_header: IpNumber::of(raw[6]),
            hop_limit: raw[7],
            src_addr: Ipv6Addr::from(src),
            dst_addr: Ipv6Addr::from(dst),
        };

        let rest = &raw[Ipv6Header::LEN..];
        // payload length 0 with a payload present means a jumbogram; take
        // the whole range
        let payload_len = if header.payload_length == 0 {
            rest.len()
        } else {
            (header.payload_length as usize).min(rest.len())
        };

        let payload_raw = &rest[..payload_len];
        let payload = if payload_raw.is_empty() {
            Payload::None
        } else {
            factories
                .ip_number()
                .new_packet(payload_raw, factories, &[header.next_header.clone()])
        };

        Ok(Self { header, payload })
    }

    /// The packet header
    pub fn header(&self) -> &Ipv6Header {
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
    pub fn builder() -> Ipv6Builder {
        Ipv6Builder::new()
    }

    /// A builder preloaded with this packet's fields
    pub fn to_builder(&self) -> Ipv6Builder {
        Ipv6Builder {
            traffic_class: self.header.traffic_class,
            flow_label: self.header.flow_label,
            payload_length: self.header.payload_length,
            next_header: self.header.next_header.clone(),
            hop_limit: self.header.hop_limit,
            src_addr: self.header.src_addr,
            dst_addr: self.header.dst_addr,
            payload: BuilderPayload::Packet(self.payload.clone()),
            correct_length_at_build: false,
        }
    }
}

/// Builder for [`Ipv6Packet`]
#[derive(Clone, Debug)]
pub struct Ipv6Builder {
    traffic_class: u8,
    flow_label: u32,
    payload_length: u16,
    next_header: IpNumber,
    hop_limit: u8,
    src_addr: Ipv6Addr,
    dst_addr: Ipv6Addr,
    payload: BuilderPayload,
    correct_length_at_build: bool,
}

impl Ipv6Builder {
    /// A builder with hop limit 64, UDP next header, and length corrected
    /// at build
    pub fn new() -> Self {
        Self {
            traffic_class: 0,
            flow_label: 0,
            payload_length: 0,
            next_header: IpNumber::UDP,
            hop_limit: 64,
            src_addr: Ipv6Addr::UNSPECIFIED,
            dst_addr: Ipv6Addr::UNSPECIFIED,
            payload: BuilderPayload::None,
            correct_length_at_build: true,
        }
    }

    /// Set the traffic class
    pub fn traffic_class(mut self, traffic_class: u8) -> Self {
        self.traffic_class = traffic_class;
        self
    }

    /// Set the flow label (20-bit field)
    pub fn flow_label(mut self, flow_label: u32) -> Self {
        self.flow_label = flow_label;
        self
    }

    /// Set the payload length field (ignored when length correction is on)
    pub fn payload_length(mut self, payload_length: u16) -> Self {
        self.payload_length = payload_length;
        self
    }

    /// Set the next-header protocol number
    pub fn next_header(mut self, next_header: IpNumber) -> Self {
        self.next_header = next_header;
        self
    }

    /// Set the hop limit
    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    /// Set the source address
    pub fn src_addr(mut self, addr: Ipv6Addr) -> Self {
        self.src_addr = addr;
        self
    }

    /// Set the destination address
    pub fn dst_addr(mut self, addr: Ipv6Addr) -> Self {
        self.dst_addr = addr;
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

    /// Compute the payload length at build time
    pub fn correct_length_at_build(mut self, on: bool) -> Self {
        self.correct_length_at_build = on;
        self
    }

    /// The nested payload slot
    pub fn payload_mut(&mut self) -> &mut BuilderPayload {
        &mut self.payload
    }

    /// Build the packet
    pub fn build(&self) -> Result<Ipv6Packet> {
        if self.flow_label > 0x000f_ffff {
            return Err(Error::invalid_field("flow_label", "exceeds 20-bit field"));
        }

        let payload = self.payload.build()?;

        let payload_length = if self.correct_length_at_build {
            if payload.len() > u16::MAX as usize {
                return Err(Error::build(format!(
                    "payload length {} exceeds the IPv6 payload length field",
                    payload.len()
                )));
            }
            payload.len() as u16
        } else {
            self.payload_length
        };

        Ok(Ipv6Packet {
            header: Ipv6Header {
                version: IpVersion::IPV6,
                traffic_class: self.traffic_class,
                flow_label: self.flow_label,
                payload_length,
                next_header: self.next_header.clone(),
                hop_limit: self.hop_limit,
                src_addr: self.src_addr,
                dst_addr: self.dst_addr,
            },
            payload,
        })
    }
}

impl Default for Ipv6Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// IPv6 fragment extension header (RFC 8200 §4.5)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv6FragmentHeader {
    /// Next header protocol number
    pub next_header: IpNumber,
    /// Reserved byte, zero on the wire
    pub reserved: u8,
    /// Fragment offset in 8-byte units (13-bit field)
    pub fragment_offset: u16,
    /// Two reserved bits next to the M flag
    pub reserved2: u8,
    /// More Fragments flag
    pub more_fragment_flag: bool,
    /// Identification, shared by all fragments of one datagram
    pub identification: u32,
}

impl Ipv6FragmentHeader {
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

    /// Fragment offset converted to a byte count
    pub fn fragment_byte_offset(&self) -> usize {
        self.fragment_offset as usize * 8
    }

    /// Encode the header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u8(self.next_header.value());
        buf.put_u8(self.reserved);
        let mut word = (self.fragment_offset & 0x1fff) << 3;
        word |= ((self.reserved2 & 0b11) as u16) << 1;
        if self.more_fragment_flag {
            word |= 1;
        }
        buf.put_u16(word);
        buf.put_u32(self.identification);
        buf.to_vec()
    }
}

/// An immutable IPv6 fragment extension header with its payload
///
/// Only an unfragmented-start fragment (offset 0, M clear) has its payload
/// dispatched; any real fragment keeps raw bytes until defragmentation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ipv6FragmentPacket {
    header: Ipv6FragmentHeader,
    payload: Payload,
}

impl Ipv6FragmentPacket {
    /// Decode a fragment extension header and its payload
    pub fn from_bytes(raw: &[u8], factories: &PacketFactories) -> Result<Self> {
        if raw.len() < Ipv6FragmentHeader::LEN {
            return Err(Error::illegal_raw_data(format!(
                "IPv6 fragment header too short: {} bytes, need {}",
                raw.len(),
                Ipv6FragmentHeader::LEN
            )));
        }

        let word = u16::from_be_bytes([raw[2], raw[3]]);
        let header = Ipv6FragmentHeader {
            next_header: IpNumber::of(raw[0]),
            reserved: raw[1],
            fragment_offset: word >> 3,
            reserved2: ((word >> 1) & 0b11) as u8,
            more_fragment_flag: word & 1 != 0,
            identification: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        };

        let payload_raw = &raw[Ipv6FragmentHeader::LEN..];
        let payload = if payload_raw.is_empty() {
            Payload::None
        } else if header.fragment_offset != 0 || header.more_fragment_flag {
            Payload::Unknown(UnknownPacket::new(payload_raw))
        } else {
            factories
                .ip_number()
                .new_packet(payload_raw, factories, &[header.next_header.clone()])
        };

        Ok(Self { header, payload })
    }

    /// The extension header
    pub fn header(&self) -> &Ipv6FragmentHeader {
        &self.header
    }

    /// The payload, raw for real fragments
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Total length in bytes
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
    pub fn builder() -> Ipv6FragmentBuilder {
        Ipv6FragmentBuilder::new()
    }

    /// A builder preloaded with this packet's fields
    pub fn to_builder(&self) -> Ipv6FragmentBuilder {
        Ipv6FragmentBuilder {
            next_header: self.header.next_header.clone(),
            fragment_offset: self.header.fragment_offset,
            more_fragment_flag: self.header.more_fragment_flag,
            identification: self.header.identification,
            payload: BuilderPayload::Packet(self.payload.clone()),
        }
    }
}

/// Builder for [`Ipv6FragmentPacket`]
#[derive(Clone, Debug)]
pub struct Ipv6FragmentBuilder {
    next_header: IpNumber,
    fragment_offset: u16,
    more_fragment_flag: bool,
    identification: u32,
    payload: BuilderPayload,
}

impl Ipv6FragmentBuilder {
    /// A builder for a lone fragment with zero offset
    pub fn new() -> Self {
        Self {
            next_header: IpNumber::UDP,
            fragment_offset: 0,
            more_fragment_flag: false,
            identification: 0,
            payload: BuilderPayload::None,
        }
    }

    /// Set the next-header protocol number
    pub fn next_header(mut self, next_header: IpNumber) -> Self {
        self.next_header = next_header;
        self
    }

    /// Set the fragment offset in 8-byte units
    pub fn fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset;
        self
    }

    /// Set the More Fragments flag
    pub fn more_fragment_flag(mut self, on: bool) -> Self {
        self.more_fragment_flag = on;
        self
    }

    /// Set the identification
    pub fn identification(mut self, identification: u32) -> Self {
        self.identification = identification;
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

    /// The nested payload slot
    pub fn payload_mut(&mut self) -> &mut BuilderPayload {
        &mut self.payload
    }

    /// Build the packet
    pub fn build(&self) -> Result<Ipv6FragmentPacket> {
        if self.fragment_offset > 0x1fff {
            return Err(Error::invalid_field(
                "fragment_offset",
                "exceeds 13-bit field",
            ));
        }

        Ok(Ipv6FragmentPacket {
            header: Ipv6FragmentHeader {
                next_header: self.next_header.clone(),
                reserved: 0,
                fragment_offset: self.fragment_offset,
                reserved2: 0,
                more_fragment_flag: self.more_fragment_flag,
                identification: self.identification,
            },
            payload: self.payload.build()?,
        })
    }
}

impl Default for Ipv6FragmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn decode(raw: &[u8], factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::Ipv6(Box::new(Ipv6Packet::from_bytes(
        raw, factories,
    )?)))
}

pub(crate) fn decode_fragment(raw: &[u8], factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::Ipv6Fragment(Box::new(
        Ipv6FragmentPacket::from_bytes(raw, factories)?,
    )))
}
