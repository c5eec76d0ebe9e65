//! Layered packet codec for lamina
//!
//! This crate turns raw byte buffers into typed, layered packet chains
//! (Ethernet, ARP, IPv4/IPv6, ICMPv4, TCP, UDP) and typed chains back into
//! exact-byte-equivalent wire data. It provides:
//!
//! - [`packet`] - the immutable [`Payload`] chain and the nested builder
//!   model ([`AnyBuilder`], [`BuilderPayload`])
//! - one module per protocol family with a `*Packet` / `*Builder` pair
//! - [`checksum`] - Internet checksum and pseudo-header variants
//! - [`factory`] - number-keyed dispatch with interchangeable bindings
//! - [`unknown`] - the unknown and illegal-data terminals that keep
//!   decoding total
//!
//! # Decoding
//!
//! ```rust
//! use lamina_core::DataLinkType;
//! use lamina_packet::Codec;
//!
//! let codec = Codec::with_defaults();
//! let raw: &[u8] = &[0u8; 64]; // bytes from a capture collaborator
//! let decoded = codec.decode(raw, DataLinkType::ETHERNET);
//! if let Some(ip) = decoded.find_ipv4() {
//!     println!("from {}", ip.header().src_addr);
//! }
//! ```
//!
//! # Building
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use lamina_core::{EtherType, IpNumber, MacAddr, Port};
//! use lamina_packet::{EthernetBuilder, Ipv4Builder, UdpBuilder};
//!
//! let frame = EthernetBuilder::new()
//!     .src_addr(MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
//!     .dst_addr(MacAddr::broadcast())
//!     .ether_type(EtherType::IPV4)
//!     .payload_builder(
//!         Ipv4Builder::new()
//!             .src_addr(Ipv4Addr::new(192, 168, 1, 1))
//!             .dst_addr(Ipv4Addr::new(192, 168, 1, 2))
//!             .protocol(IpNumber::UDP)
//!             .payload_builder(
//!                 UdpBuilder::new()
//!                     .src_port(Port::of(12345))
//!                     .dst_port(Port::DNS),
//!             ),
//!     )
//!     .pad_at_build(true)
//!     .build()
//!     .unwrap();
//! let wire = frame.to_bytes();
//! assert_eq!(wire.len(), 60);
//! ```

pub mod arp;
pub mod checksum;
pub mod ethernet;
pub mod factory;
pub mod icmpv4;
pub mod ipv4;
pub mod ipv6;
pub mod packet;
pub mod tcp;
pub mod udp;
pub mod unknown;

// Re-export commonly used types for convenience
pub use arp::{ArpBuilder, ArpHeader, ArpPacket};
pub use checksum::{internet_checksum, transport_checksum, validate_checksum};
pub use ethernet::{EthernetBuilder, EthernetHeader, EthernetPacket};
pub use factory::{
    Codec, DispatchTable, FactoryCache, FactoryHandle, FactoryKey, FactoryProvider,
    NumberFamily, PacketFactories, PacketTarget, PropertiesProvider, StaticProvider,
};
pub use icmpv4::{
    IcmpEchoHeader, IcmpV4Builder, IcmpV4EchoBuilder, IcmpV4EchoPacket, IcmpV4EchoReplyBuilder,
    IcmpV4EchoReplyPacket, IcmpV4Header, IcmpV4Packet,
};
pub use ipv4::{Ipv4Builder, Ipv4Header, Ipv4Packet};
pub use ipv6::{
    Ipv6Builder, Ipv6FragmentBuilder, Ipv6FragmentHeader, Ipv6FragmentPacket, Ipv6Header,
    Ipv6Packet,
};
pub use packet::{AnyBuilder, BuilderPayload, Layers, Payload};
pub use tcp::{TcpBuilder, TcpHeader, TcpOption, TcpPacket};
pub use udp::{UdpBuilder, UdpHeader, UdpPacket};
pub use unknown::{IllegalPacket, UnknownPacket};
