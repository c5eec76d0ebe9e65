//! The layered packet model
//!
//! A decoded packet is an immutable chain: each protocol unit owns exactly
//! one header and zero-or-one payload, which is itself a packet. The chain
//! terminates in an [`UnknownPacket`], an [`IllegalPacket`], or
//! [`Payload::None`]. Encoding a chain reproduces the exact wire bytes it
//! was decoded from.
//!
//! Builders mirror the chain mutably: a builder's payload is either an
//! already-built [`Payload`] or a nested pending builder
//! ([`BuilderPayload`]), so an encapsulation stack can be assembled
//! bottom-up or top-down before any checksum or length is known.

use lamina_core::Result;

use crate::arp::{ArpBuilder, ArpPacket};
use crate::ethernet::{EthernetBuilder, EthernetPacket};
use crate::icmpv4::{
    IcmpV4Builder, IcmpV4EchoBuilder, IcmpV4EchoPacket, IcmpV4EchoReplyBuilder,
    IcmpV4EchoReplyPacket, IcmpV4Packet,
};
use crate::ipv4::{Ipv4Builder, Ipv4Packet};
use crate::ipv6::{Ipv6Builder, Ipv6FragmentBuilder, Ipv6FragmentPacket, Ipv6Packet};
use crate::tcp::{TcpBuilder, TcpPacket};
use crate::udp::{UdpBuilder, UdpPacket};
use crate::unknown::{IllegalPacket, UnknownPacket};

/// A decoded protocol unit, or the terminal of a payload chain
///
/// Structural equality compares headers and payload chains; hashing is
/// consistent with equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Payload {
    /// Ethernet II frame
    Ethernet(Box<EthernetPacket>),
    /// ARP packet
    Arp(Box<ArpPacket>),
    /// IPv4 packet
    Ipv4(Box<Ipv4Packet>),
    /// IPv6 packet
    Ipv6(Box<Ipv6Packet>),
    /// IPv6 fragment extension header
    Ipv6Fragment(Box<Ipv6FragmentPacket>),
    /// ICMPv4 common header
    IcmpV4(Box<IcmpV4Packet>),
    /// ICMPv4 echo body
    IcmpV4Echo(Box<IcmpV4EchoPacket>),
    /// ICMPv4 echo reply body
    IcmpV4EchoReply(Box<IcmpV4EchoReplyPacket>),
    /// TCP segment
    Tcp(Box<TcpPacket>),
    /// UDP datagram
    Udp(Box<UdpPacket>),
    /// Raw bytes no decoder was bound for
    Unknown(UnknownPacket),
    /// Raw bytes a decoder rejected
    Illegal(IllegalPacket),
    /// Empty payload
    None,
}

macro_rules! layer_finder {
    ($(#[$m:meta])* $fn_name:ident, $variant:ident, $ty:ty) => {
        $(#[$m])*
        pub fn $fn_name(&self) -> Option<&$ty> {
            self.layers().find_map(|layer| match layer {
                Payload::$variant(p) => Some(&**p),
                _ => None,
            })
        }
    };
}

impl Payload {
    /// Encode the whole chain to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Ethernet(p) => p.to_bytes(),
            Payload::Arp(p) => p.to_bytes(),
            Payload::Ipv4(p) => p.to_bytes(),
            Payload::Ipv6(p) => p.to_bytes(),
            Payload::Ipv6Fragment(p) => p.to_bytes(),
            Payload::IcmpV4(p) => p.to_bytes(),
            Payload::IcmpV4Echo(p) => p.to_bytes(),
            Payload::IcmpV4EchoReply(p) => p.to_bytes(),
            Payload::Tcp(p) => p.to_bytes(),
            Payload::Udp(p) => p.to_bytes(),
            Payload::Unknown(p) => p.to_bytes(),
            Payload::Illegal(p) => p.to_bytes(),
            Payload::None => Vec::new(),
        }
    }

    /// Total length in bytes of this unit including its payload chain
    pub fn len(&self) -> usize {
        match self {
            Payload::Ethernet(p) => p.len(),
            Payload::Arp(p) => p.len(),
            Payload::Ipv4(p) => p.len(),
            Payload::Ipv6(p) => p.len(),
            Payload::Ipv6Fragment(p) => p.len(),
            Payload::IcmpV4(p) => p.len(),
            Payload::IcmpV4Echo(p) => p.len(),
            Payload::IcmpV4EchoReply(p) => p.len(),
            Payload::Tcp(p) => p.len(),
            Payload::Udp(p) => p.len(),
            Payload::Unknown(p) => p.len(),
            Payload::Illegal(p) => p.len(),
            Payload::None => 0,
        }
    }

    /// True for an empty terminal
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The immediate payload of this unit, if it has one
    pub fn child(&self) -> Option<&Payload> {
        match self {
            Payload::Ethernet(p) => Some(p.payload()),
            Payload::Ipv4(p) => Some(p.payload()),
            Payload::Ipv6(p) => Some(p.payload()),
            Payload::Ipv6Fragment(p) => Some(p.payload()),
            Payload::IcmpV4(p) => Some(p.payload()),
            Payload::IcmpV4Echo(p) => Some(p.payload()),
            Payload::IcmpV4EchoReply(p) => Some(p.payload()),
            Payload::Tcp(p) => Some(p.payload()),
            Payload::Udp(p) => Some(p.payload()),
            Payload::Arp(_) | Payload::Unknown(_) | Payload::Illegal(_) | Payload::None => None,
        }
    }

    /// Iterate over the chain from this unit inward
    pub fn layers(&self) -> Layers<'_> {
        Layers { next: Some(self) }
    }

    layer_finder!(
        /// Find the Ethernet layer anywhere in the chain
        find_ethernet, Ethernet, EthernetPacket
    );
    layer_finder!(
        /// Find the ARP layer anywhere in the chain
        find_arp, Arp, ArpPacket
    );
    layer_finder!(
        /// Find the IPv4 layer anywhere in the chain
        find_ipv4, Ipv4, Ipv4Packet
    );
    layer_finder!(
        /// Find the IPv6 layer anywhere in the chain
        find_ipv6, Ipv6, Ipv6Packet
    );
    layer_finder!(
        /// Find the IPv6 fragment extension layer anywhere in the chain
        find_ipv6_fragment, Ipv6Fragment, Ipv6FragmentPacket
    );
    layer_finder!(
        /// Find the ICMPv4 layer anywhere in the chain
        find_icmpv4, IcmpV4, IcmpV4Packet
    );
    layer_finder!(
        /// Find the ICMPv4 echo body anywhere in the chain
        find_icmpv4_echo, IcmpV4Echo, IcmpV4EchoPacket
    );
    layer_finder!(
        /// Find the ICMPv4 echo reply body anywhere in the chain
        find_icmpv4_echo_reply, IcmpV4EchoReply, IcmpV4EchoReplyPacket
    );
    layer_finder!(
        /// Find the TCP layer anywhere in the chain
        find_tcp, Tcp, TcpPacket
    );
    layer_finder!(
        /// Find the UDP layer anywhere in the chain
        find_udp, Udp, UdpPacket
    );

    /// Find the unknown terminal anywhere in the chain
    pub fn find_unknown(&self) -> Option<&UnknownPacket> {
        self.layers().find_map(|layer| match layer {
            Payload::Unknown(p) => Some(p),
            _ => None,
        })
    }

    /// Find the illegal-data terminal anywhere in the chain
    pub fn find_illegal(&self) -> Option<&IllegalPacket> {
        self.layers().find_map(|layer| match layer {
            Payload::Illegal(p) => Some(p),
            _ => None,
        })
    }
}

/// Iterator over a payload chain, outermost first
pub struct Layers<'a> {
    next: Option<&'a Payload>,
}

impl<'a> Iterator for Layers<'a> {
    type Item = &'a Payload;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.child();
        Some(current)
    }
}

/// A builder's payload: nothing yet, a finished packet, or a pending builder
#[derive(Clone, Debug, Default)]
pub enum BuilderPayload {
    /// No payload
    #[default]
    None,
    /// An already-built payload chain, used as-is
    Packet(Payload),
    /// A nested builder, built when the outer builder builds
    Builder(Box<AnyBuilder>),
}

impl BuilderPayload {
    /// Build (or pass through) the payload chain
    pub fn build(&self) -> Result<Payload> {
        match self {
            BuilderPayload::None => Ok(Payload::None),
            BuilderPayload::Packet(p) => Ok(p.clone()),
            BuilderPayload::Builder(b) => b.build(),
        }
    }
}

/// Any protocol builder, for nesting builders into chains
#[derive(Clone, Debug)]
pub enum AnyBuilder {
    /// Ethernet frame builder
    Ethernet(EthernetBuilder),
    /// ARP packet builder
    Arp(ArpBuilder),
    /// IPv4 packet builder
    Ipv4(Ipv4Builder),
    /// IPv6 packet builder
    Ipv6(Ipv6Builder),
    /// IPv6 fragment extension builder
    Ipv6Fragment(Ipv6FragmentBuilder),
    /// ICMPv4 common header builder
    IcmpV4(IcmpV4Builder),
    /// ICMPv4 echo builder
    IcmpV4Echo(IcmpV4EchoBuilder),
    /// ICMPv4 echo reply builder
    IcmpV4EchoReply(IcmpV4EchoReplyBuilder),
    /// TCP segment builder
    Tcp(TcpBuilder),
    /// UDP datagram builder
    Udp(UdpBuilder),
}

macro_rules! builder_finder {
    ($(#[$m:meta])* $fn_name:ident, $variant:ident, $ty:ty) => {
        $(#[$m])*
        pub fn $fn_name(&mut self) -> Option<&mut $ty> {
            if let AnyBuilder::$variant(b) = self {
                return Some(b);
            }
            match self.payload_mut() {
                Some(BuilderPayload::Builder(inner)) => inner.$fn_name(),
                _ => None,
            }
        }
    };
}

macro_rules! builder_from {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for AnyBuilder {
            fn from(builder: $ty) -> Self {
                AnyBuilder::$variant(builder)
            }
        }
    };
}

builder_from!(Ethernet, EthernetBuilder);
builder_from!(Arp, ArpBuilder);
builder_from!(Ipv4, Ipv4Builder);
builder_from!(Ipv6, Ipv6Builder);
builder_from!(Ipv6Fragment, Ipv6FragmentBuilder);
builder_from!(IcmpV4, IcmpV4Builder);
builder_from!(IcmpV4Echo, IcmpV4EchoBuilder);
builder_from!(IcmpV4EchoReply, IcmpV4EchoReplyBuilder);
builder_from!(Tcp, TcpBuilder);
builder_from!(Udp, UdpBuilder);

impl AnyBuilder {
    /// Build the packet this builder describes, wrapped as a [`Payload`]
    ///
    /// Building is a pure function of builder state: building twice from
    /// the same state yields equal payloads. The builder stays usable.
    pub fn build(&self) -> Result<Payload> {
        Ok(match self {
            AnyBuilder::Ethernet(b) => Payload::Ethernet(Box::new(b.build()?)),
            AnyBuilder::Arp(b) => Payload::Arp(Box::new(b.build()?)),
            AnyBuilder::Ipv4(b) => Payload::Ipv4(Box::new(b.build()?)),
            AnyBuilder::Ipv6(b) => Payload::Ipv6(Box::new(b.build()?)),
            AnyBuilder::Ipv6Fragment(b) => Payload::Ipv6Fragment(Box::new(b.build()?)),
            AnyBuilder::IcmpV4(b) => Payload::IcmpV4(Box::new(b.build()?)),
            AnyBuilder::IcmpV4Echo(b) => Payload::IcmpV4Echo(Box::new(b.build()?)),
            AnyBuilder::IcmpV4EchoReply(b) => Payload::IcmpV4EchoReply(Box::new(b.build()?)),
            AnyBuilder::Tcp(b) => Payload::Tcp(Box::new(b.build()?)),
            AnyBuilder::Udp(b) => Payload::Udp(Box::new(b.build()?)),
        })
    }

    /// The nested payload slot of this builder, if the family carries one
    ///
    /// ARP is a leaf family and has no payload slot.
    pub fn payload_mut(&mut self) -> Option<&mut BuilderPayload> {
        match self {
            AnyBuilder::Ethernet(b) => Some(b.payload_mut()),
            AnyBuilder::Arp(_) => None,
            AnyBuilder::Ipv4(b) => Some(b.payload_mut()),
            AnyBuilder::Ipv6(b) => Some(b.payload_mut()),
            AnyBuilder::Ipv6Fragment(b) => Some(b.payload_mut()),
            AnyBuilder::IcmpV4(b) => Some(b.payload_mut()),
            AnyBuilder::IcmpV4Echo(b) => Some(b.payload_mut()),
            AnyBuilder::IcmpV4EchoReply(b) => Some(b.payload_mut()),
            AnyBuilder::Tcp(b) => Some(b.payload_mut()),
            AnyBuilder::Udp(b) => Some(b.payload_mut()),
        }
    }

    builder_finder!(
        /// Find the Ethernet builder in this chain
        find_ethernet_mut, Ethernet, EthernetBuilder
    );
    builder_finder!(
        /// Find the ARP builder in this chain
        find_arp_mut, Arp, ArpBuilder
    );
    builder_finder!(
        /// Find the IPv4 builder in this chain
        find_ipv4_mut, Ipv4, Ipv4Builder
    );
    builder_finder!(
        /// Find the IPv6 builder in this chain
        find_ipv6_mut, Ipv6, Ipv6Builder
    );
    builder_finder!(
        /// Find the IPv6 fragment builder in this chain
        find_ipv6_fragment_mut, Ipv6Fragment, Ipv6FragmentBuilder
    );
    builder_finder!(
        /// Find the ICMPv4 builder in this chain
        find_icmpv4_mut, IcmpV4, IcmpV4Builder
    );
    builder_finder!(
        /// Find the ICMPv4 echo builder in this chain
        find_icmpv4_echo_mut, IcmpV4Echo, IcmpV4EchoBuilder
    );
    builder_finder!(
        /// Find the ICMPv4 echo reply builder in this chain
        find_icmpv4_echo_reply_mut, IcmpV4EchoReply, IcmpV4EchoReplyBuilder
    );
    builder_finder!(
        /// Find the TCP builder in this chain
        find_tcp_mut, Tcp, TcpBuilder
    );
    builder_finder!(
        /// Find the UDP builder in this chain
        find_udp_mut, Udp, UdpBuilder
    );
}
