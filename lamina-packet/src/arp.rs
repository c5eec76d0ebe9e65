//! ARP packet codec
//!
//! Ethernet/IPv4 ARP only: the hardware and protocol address lengths on the
//! wire must be 6 and 4. Other combinations are rejected as illegal raw
//! data and surface as an illegal-data terminal through the factory.

use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use lamina_core::{ArpHardwareType, ArpOperation, Error, EtherType, MacAddr, Result};

use crate::factory::PacketFactories;
use crate::packet::Payload;

/// ARP header, the whole 28-byte packet
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArpHeader {
    /// Hardware type, Ethernet (1) for this codec
    pub hardware_type: ArpHardwareType,
    /// Protocol type, an EtherType (0x0800 for IPv4)
    pub protocol_type: EtherType,
    /// Hardware address length, always 6
    pub hardware_addr_length: u8,
    /// Protocol address length, always 4
    pub protocol_addr_length: u8,
    /// Operation code
    pub operation: ArpOperation,
    /// Sender hardware address
    pub src_hardware_addr: MacAddr,
    /// Sender protocol address
    pub src_protocol_addr: Ipv4Addr,
    /// Target hardware address
    pub dst_hardware_addr: MacAddr,
    /// Target protocol address
    pub dst_protocol_addr: Ipv4Addr,
}

impl ArpHeader {
    /// Header size in bytes
    pub const LEN: usize = 28;

    /// Encode the header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u16(self.hardware_type.value());
        buf.put_u16(self.protocol_type.value());
        buf.put_u8(self.hardware_addr_length);
        buf.put_u8(self.protocol_addr_length);
        buf.put_u16(self.operation.value());
        buf.put_slice(self.src_hardware_addr.as_bytes());
        buf.put_slice(&self.src_protocol_addr.octets());
        buf.put_slice(self.dst_hardware_addr.as_bytes());
        buf.put_slice(&self.dst_protocol_addr.octets());
        buf.to_vec()
    }

    /// Header length in bytes
    pub fn len(&self) -> usize {
        Self::LEN
    }

    /// Headers are never empty
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// An immutable ARP packet
///
/// ARP is a leaf: it carries no payload chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArpPacket {
    header: ArpHeader,
}

impl ArpPacket {
    /// Decode an ARP packet
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < ArpHeader::LEN {
            return Err(Error::illegal_raw_data(format!(
                "ARP packet too short: {} bytes, need {}",
                raw.len(),
                ArpHeader::LEN
            )));
        }

        let hardware_addr_length = raw[4];
        let protocol_addr_length = raw[5];
        if hardware_addr_length != 6 || protocol_addr_length != 4 {
            return Err(Error::illegal_raw_data(format!(
                "unsupported ARP address lengths: hw {} proto {}",
                hardware_addr_length, protocol_addr_length
            )));
        }

        let mut src_hw = [0u8; 6];
        src_hw.copy_from_slice(&raw[8..14]);
        let mut dst_hw = [0u8; 6];
        dst_hw.copy_from_slice(&raw[18..24]);

        let header = ArpHeader {
            hardware_type: ArpHardwareType::of(u16::from_be_bytes([raw[0], raw[1]])),
            protocol_type: EtherType::of(u16::from_be_bytes([raw[2], raw[3]])),
            hardware_addr_length,
            protocol_addr_length,
            operation: ArpOperation::of(u16::from_be_bytes([raw[6], raw[7]])),
            src_hardware_addr: MacAddr::new(src_hw),
            src_protocol_addr: Ipv4Addr::new(raw[14], raw[15], raw[16], raw[17]),
            dst_hardware_addr: MacAddr::new(dst_hw),
            dst_protocol_addr: Ipv4Addr::new(raw[24], raw[25], raw[26], raw[27]),
        };

        Ok(Self { header })
    }

    /// The packet header
    pub fn header(&self) -> &ArpHeader {
        &self.header
    }

    /// Packet length in bytes
    pub fn len(&self) -> usize {
        self.header.len()
    }

    /// Packets are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.header.to_bytes()
    }

    /// True for a request operation
    pub fn is_request(&self) -> bool {
        self.header.operation == ArpOperation::REQUEST
    }

    /// True for a reply operation
    pub fn is_reply(&self) -> bool {
        self.header.operation == ArpOperation::REPLY
    }

    /// True for gratuitous ARP (sender announces its own address)
    pub fn is_gratuitous(&self) -> bool {
        self.header.src_protocol_addr == self.header.dst_protocol_addr
    }

    /// A fresh builder with default fields
    pub fn builder() -> ArpBuilder {
        ArpBuilder::new()
    }

    /// A builder preloaded with this packet's fields
    pub fn to_builder(&self) -> ArpBuilder {
        ArpBuilder {
            hardware_type: self.header.hardware_type.clone(),
            protocol_type: self.header.protocol_type.clone(),
            operation: self.header.operation.clone(),
            src_hardware_addr: self.header.src_hardware_addr,
            src_protocol_addr: self.header.src_protocol_addr,
            dst_hardware_addr: self.header.dst_hardware_addr,
            dst_protocol_addr: self.header.dst_protocol_addr,
        }
    }
}

/// Builder for [`ArpPacket`]
///
/// Address lengths are fixed at 6/4 and filled in at build time.
#[derive(Clone, Debug)]
pub struct ArpBuilder {
    hardware_type: ArpHardwareType,
    protocol_type: EtherType,
    operation: ArpOperation,
    src_hardware_addr: MacAddr,
    src_protocol_addr: Ipv4Addr,
    dst_hardware_addr: MacAddr,
    dst_protocol_addr: Ipv4Addr,
}

impl ArpBuilder {
    /// A builder for an Ethernet/IPv4 ARP request with zero addresses
    pub fn new() -> Self {
        Self {
            hardware_type: ArpHardwareType::ETHERNET,
            protocol_type: EtherType::IPV4,
            operation: ArpOperation::REQUEST,
            src_hardware_addr: MacAddr::zero(),
            src_protocol_addr: Ipv4Addr::UNSPECIFIED,
            dst_hardware_addr: MacAddr::zero(),
            dst_protocol_addr: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Set the hardware type
    pub fn hardware_type(mut self, hardware_type: ArpHardwareType) -> Self {
        self.hardware_type = hardware_type;
        self
    }

    /// Set the protocol type
    pub fn protocol_type(mut self, protocol_type: EtherType) -> Self {
        self.protocol_type = protocol_type;
        self
    }

    /// Set the operation code
    pub fn operation(mut self, operation: ArpOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Set the sender hardware address
    pub fn src_hardware_addr(mut self, addr: MacAddr) -> Self {
        self.src_hardware_addr = addr;
        self
    }

    /// Set the sender protocol address
    pub fn src_protocol_addr(mut self, addr: Ipv4Addr) -> Self {
        self.src_protocol_addr = addr;
        self
    }

    /// Set the target hardware address
    pub fn dst_hardware_addr(mut self, addr: MacAddr) -> Self {
        self.dst_hardware_addr = addr;
        self
    }

    /// Set the target protocol address
    pub fn dst_protocol_addr(mut self, addr: Ipv4Addr) -> Self {
        self.dst_protocol_addr = addr;
        self
    }

    /// Build the packet
    pub fn build(&self) -> Result<ArpPacket> {
        Ok(ArpPacket {
            header: ArpHeader {
                hardware_type: self.hardware_type.clone(),
                protocol_type: self.protocol_type.clone(),
                hardware_addr_length: 6,
                protocol_addr_length: 4,
                operation: self.operation.clone(),
                src_hardware_addr: self.src_hardware_addr,
                src_protocol_addr: self.src_protocol_addr,
                dst_hardware_addr: self.dst_hardware_addr,
                dst_protocol_addr: self.dst_protocol_addr,
            },
        })
    }
}

impl Default for ArpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn decode(raw: &[u8], _factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::Arp(Box::new(ArpPacket::from_bytes(raw)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ArpPacket {
        ArpBuilder::new()
            .operation(ArpOperation::REQUEST)
            .src_hardware_addr(MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
            .src_protocol_addr(Ipv4Addr::new(192, 168, 1, 1))
            .dst_protocol_addr(Ipv4Addr::new(192, 168, 1, 2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_arp_is_28_bytes() {
        let packet = request();
        assert_eq!(packet.len(), 28);
        assert_eq!(packet.to_bytes().len(), 28);
    }

    #[test]
    fn test_arp_roundtrip() {
        let packet = request();
        let decoded = ArpPacket::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_arp_wire_layout() {
        let bytes = request().to_bytes();
        assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), 1); // hw type
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 0x0800); // proto type
        assert_eq!(bytes[4], 6); // hw len
        assert_eq!(bytes[5], 4); // proto len
        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]), 1); // request
        assert_eq!(&bytes[8..14], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(&bytes[14..18], &[192, 168, 1, 1]);
        assert_eq!(&bytes[24..28], &[192, 168, 1, 2]);
    }

    #[test]
    fn test_arp_too_short() {
        assert!(ArpPacket::from_bytes(&[0u8; 27]).is_err());
    }

    #[test]
    fn test_arp_unsupported_lengths() {
        let mut bytes = request().to_bytes();
        bytes[4] = 8; // not a MAC
        let err = ArpPacket::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("address lengths"));
    }

    #[test]
    fn test_arp_predicates() {
        assert!(request().is_request());
        assert!(!request().is_reply());

        let gratuitous = ArpBuilder::new()
            .src_protocol_addr(Ipv4Addr::new(10, 0, 0, 1))
            .dst_protocol_addr(Ipv4Addr::new(10, 0, 0, 1))
            .build()
            .unwrap();
        assert!(gratuitous.is_gratuitous());
    }

    #[test]
    fn test_to_builder_preserves_fields() {
        let packet = request();
        let rebuilt = packet.to_builder().build().unwrap();
        assert_eq!(packet, rebuilt);

        let reply = packet
            .to_builder()
            .operation(ArpOperation::REPLY)
            .build()
            .unwrap();
        assert!(reply.is_reply());
        assert_eq!(
            reply.header().src_protocol_addr,
            packet.header().src_protocol_addr
        );
    }
}
