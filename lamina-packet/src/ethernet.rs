//! Ethernet II frame codec

use bytes::{BufMut, BytesMut};

use lamina_core::{Error, EtherType, MacAddr, Result};

use crate::factory::PacketFactories;
use crate::packet::{BuilderPayload, Payload};

/// Ethernet II header: destination MAC, source MAC, EtherType
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EthernetHeader {
    /// Destination MAC address
    pub dst_addr: MacAddr,
    /// Source MAC address
    pub src_addr: MacAddr,
    /// EtherType of the payload
    pub ether_type: EtherType,
}

impl EthernetHeader {
    /// Header size in bytes
    pub const LEN: usize = 14;

    /// Encode the header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_slice(self.dst_addr.as_bytes());
        buf.put_slice(self.src_addr.as_bytes());
        buf.put_u16(self.ether_type.value());
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

/// An immutable Ethernet II frame with its decoded payload chain
///
/// Trailing bytes past the payload's declared length (frame padding up to
/// the 60-byte minimum) are retained so encoding reproduces the wire bytes
/// exactly.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EthernetPacket {
    header: EthernetHeader,
    payload: Payload,
    pad: Vec<u8>,
}

impl EthernetPacket {
    /// Minimum frame size on the wire, excluding FCS
    pub const MIN_FRAME_LEN: usize = 60;

    /// Decode a frame, dispatching the payload by EtherType
    ///
    /// Fails only if the range cannot hold the fixed 14-byte header; the
    /// payload decode itself is total (unknown/illegal terminals).
    pub fn from_bytes(raw: &[u8], factories: &PacketFactories) -> Result<Self> {
        if raw.len() < EthernetHeader::LEN {
            return Err(Error::illegal_raw_data(format!(
                "Ethernet frame too short: {} bytes, need {}",
                raw.len(),
                EthernetHeader::LEN
            )));
        }

        let mut dst = [0u8; 6];
        dst.copy_from_slice(&raw[0..6]);
        let mut src = [0u8; 6];
        src.copy_from_slice(&raw[6..12]);

        let header = EthernetHeader {
            dst_addr: MacAddr::new(dst),
            src_addr: MacAddr::new(src),
            ether_type: EtherType::of(u16::from_be_bytes([raw[12], raw[13]])),
        };

        let rest = &raw[EthernetHeader::LEN..];
        let payload = factories
            .ether_type()
            .new_packet(rest, factories, &[header.ether_type.clone()]);

        // a length-bearing payload (IPv4/IPv6) may consume less than the
        // remainder; what is left is frame padding
        let consumed = payload.len().min(rest.len());
        let pad = rest[consumed..].to_vec();

        Ok(Self {
            header,
            payload,
            pad,
        })
    }

    /// The frame header
    pub fn header(&self) -> &EthernetHeader {
        &self.header
    }

    /// The decoded payload chain
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Frame padding after the payload, empty if none
    pub fn pad(&self) -> &[u8] {
        &self.pad
    }

    /// Total frame length in bytes
    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len() + self.pad.len()
    }

    /// Frames are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Encode to wire bytes: header, payload, padding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes();
        bytes.extend_from_slice(&self.payload.to_bytes());
        bytes.extend_from_slice(&self.pad);
        bytes
    }

    /// A fresh builder with default fields
    pub fn builder() -> EthernetBuilder {
        EthernetBuilder::new()
    }

    /// A builder preloaded with this frame's fields, for rebuilding with
    /// some fields changed
    pub fn to_builder(&self) -> EthernetBuilder {
        EthernetBuilder {
            dst_addr: self.header.dst_addr,
            src_addr: self.header.src_addr,
            ether_type: self.header.ether_type.clone(),
            payload: BuilderPayload::Packet(self.payload.clone()),
            pad: self.pad.clone(),
            pad_at_build: false,
        }
    }
}

/// Builder for [`EthernetPacket`]
#[derive(Clone, Debug)]
pub struct EthernetBuilder {
    dst_addr: MacAddr,
    src_addr: MacAddr,
    ether_type: EtherType,
    payload: BuilderPayload,
    pad: Vec<u8>,
    pad_at_build: bool,
}

impl EthernetBuilder {
    /// A builder with zero addresses and an IPv4 EtherType
    pub fn new() -> Self {
        Self {
            dst_addr: MacAddr::zero(),
            src_addr: MacAddr::zero(),
            ether_type: EtherType::IPV4,
            payload: BuilderPayload::None,
            pad: Vec::new(),
            pad_at_build: false,
        }
    }

    /// Set the destination MAC address
    pub fn dst_addr(mut self, addr: MacAddr) -> Self {
        self.dst_addr = addr;
        self
    }

    /// Set the source MAC address
    pub fn src_addr(mut self, addr: MacAddr) -> Self {
        self.src_addr = addr;
        self
    }

    /// Set the EtherType
    pub fn ether_type(mut self, ether_type: EtherType) -> Self {
        self.ether_type = ether_type;
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

    /// Set explicit frame padding bytes
    pub fn pad(mut self, pad: Vec<u8>) -> Self {
        self.pad = pad;
        self
    }

    /// Zero-pad the frame to the 60-byte minimum at build time
    pub fn pad_at_build(mut self, on: bool) -> Self {
        self.pad_at_build = on;
        self
    }

    /// The nested payload slot
    pub fn payload_mut(&mut self) -> &mut BuilderPayload {
        &mut self.payload
    }

    /// Build the frame
    pub fn build(&self) -> Result<EthernetPacket> {
        let payload = self.payload.build()?;

        let pad = if self.pad_at_build {
            let content_len = EthernetHeader::LEN + payload.len();
            let pad_len = EthernetPacket::MIN_FRAME_LEN.saturating_sub(content_len);
            vec![0u8; pad_len]
        } else {
            self.pad.clone()
        };

        Ok(EthernetPacket {
            header: EthernetHeader {
                dst_addr: self.dst_addr,
                src_addr: self.src_addr,
                ether_type: self.ether_type.clone(),
            },
            payload,
            pad,
        })
    }
}

impl Default for EthernetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn decode(raw: &[u8], factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::Ethernet(Box::new(EthernetPacket::from_bytes(
        raw, factories,
    )?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::PacketFactories;
    use crate::unknown::UnknownPacket;

    fn factories() -> PacketFactories {
        PacketFactories::statically_bound()
    }

    #[test]
    fn test_decode_too_short() {
        let err = EthernetPacket::from_bytes(&[0u8; 13], &factories()).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_decode_unknown_ether_type() {
        let mut raw = vec![
            0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, // dst
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src
            0x88, 0xb5, // local experimental
        ];
        raw.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);

        let frame = EthernetPacket::from_bytes(&raw, &factories()).unwrap();
        assert_eq!(frame.header().ether_type.value(), 0x88b5);
        assert_eq!(
            frame.payload(),
            &Payload::Unknown(UnknownPacket::new(&[0x01, 0x02, 0x03, 0x04]))
        );
        assert_eq!(frame.to_bytes(), raw);
    }

    #[test]
    fn test_build_with_pad_at_build() {
        let frame = EthernetBuilder::new()
            .dst_addr(MacAddr::broadcast())
            .src_addr(MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
            .ether_type(EtherType::of(0x88b5))
            .payload(Payload::Unknown(UnknownPacket::new(&[0xca, 0xfe])))
            .pad_at_build(true)
            .build()
            .unwrap();

        assert_eq!(frame.len(), EthernetPacket::MIN_FRAME_LEN);
        assert_eq!(frame.to_bytes().len(), 60);
        assert_eq!(frame.pad().len(), 60 - 14 - 2);
    }

    #[test]
    fn test_builder_is_repeatable() {
        let builder = EthernetBuilder::new()
            .dst_addr(MacAddr::broadcast())
            .payload(Payload::Unknown(UnknownPacket::new(&[1, 2, 3])));

        let a = builder.build().unwrap();
        let b = builder.build().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_to_builder_roundtrip() {
        let original = EthernetBuilder::new()
            .dst_addr(MacAddr::broadcast())
            .src_addr(MacAddr::new([1, 2, 3, 4, 5, 6]))
            .ether_type(EtherType::of(0x88b5))
            .payload(Payload::Unknown(UnknownPacket::new(&[9, 9])))
            .build()
            .unwrap();

        let rebuilt = original.to_builder().build().unwrap();
        assert_eq!(original, rebuilt);

        let changed = original
            .to_builder()
            .src_addr(MacAddr::new([6, 5, 4, 3, 2, 1]))
            .build()
            .unwrap();
        assert_ne!(original, changed);
        assert_eq!(changed.payload(), original.payload());
    }
}
