//! ICMPv4 codec: common header plus echo / echo-reply bodies
//!
//! The common header carries type, code, and the checksum over the whole
//! ICMP message. The body after it is dispatched by message type; echo and
//! echo reply share one body layout (identifier, sequence number, data).

use bytes::{BufMut, BytesMut};

use lamina_core::{Error, IcmpV4Code, IcmpV4Type, Result};

use crate::checksum::internet_checksum;
use crate::factory::PacketFactories;
use crate::packet::{BuilderPayload, Payload};
use crate::unknown::UnknownPacket;

/// ICMPv4 common header
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IcmpV4Header {
    /// Message type
    pub icmp_type: IcmpV4Type,
    /// Message code
    pub code: IcmpV4Code,
    /// Checksum over the whole ICMP message
    pub checksum: u16,
}

impl IcmpV4Header {
    /// Header size in bytes
    pub const LEN: usize = 4;

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
        buf.put_u8(self.icmp_type.value());
        buf.put_u8(self.code.value());
        buf.put_u16(self.checksum);
        buf.to_vec()
    }
}

/// An immutable ICMPv4 message
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IcmpV4Packet {
    header: IcmpV4Header,
    payload: Payload,
}

impl IcmpV4Packet {
    /// Decode a message, dispatching the body by message type
    pub fn from_bytes(raw: &[u8], factories: &PacketFactories) -> Result<Self> {
        if raw.len() < IcmpV4Header::LEN {
            return Err(Error::illegal_raw_data(format!(
                "ICMPv4 message too short: {} bytes, need {}",
                raw.len(),
                IcmpV4Header::LEN
            )));
        }

        let header = IcmpV4Header {
            icmp_type: IcmpV4Type::of(raw[0]),
            code: IcmpV4Code::of(raw[1]),
            checksum: u16::from_be_bytes([raw[2], raw[3]]),
        };

        let body = &raw[IcmpV4Header::LEN..];
        let payload = if body.is_empty() {
            Payload::None
        } else {
            factories
                .icmpv4_type()
                .new_packet(body, factories, &[header.icmp_type.clone()])
        };

        Ok(Self { header, payload })
    }

    /// The common header
    pub fn header(&self) -> &IcmpV4Header {
        &self.header
    }

    /// The message body
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Total message length in bytes
    pub fn len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Messages are never empty
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
    pub fn builder() -> IcmpV4Builder {
        IcmpV4Builder::new()
    }

    /// A builder preloaded with this message's fields
    pub fn to_builder(&self) -> IcmpV4Builder {
        IcmpV4Builder {
            icmp_type: self.header.icmp_type.clone(),
            code: self.header.code.clone(),
            checksum: self.header.checksum,
            payload: BuilderPayload::Packet(self.payload.clone()),
            correct_checksum_at_build: false,
        }
    }
}

/// Builder for [`IcmpV4Packet`]
#[derive(Clone, Debug)]
pub struct IcmpV4Builder {
    icmp_type: IcmpV4Type,
    code: IcmpV4Code,
    checksum: u16,
    payload: BuilderPayload,
    correct_checksum_at_build: bool,
}

impl IcmpV4Builder {
    /// A builder for an echo message with checksum corrected at build
    pub fn new() -> Self {
        Self {
            icmp_type: IcmpV4Type::ECHO,
            code: IcmpV4Code::of(0),
            checksum: 0,
            payload: BuilderPayload::None,
            correct_checksum_at_build: true,
        }
    }

    /// Set the message type
    pub fn icmp_type(mut self, icmp_type: IcmpV4Type) -> Self {
        self.icmp_type = icmp_type;
        self
    }

    /// Set the message code
    pub fn code(mut self, code: IcmpV4Code) -> Self {
        self.code = code;
        self
    }

    /// Set the checksum placeholder (ignored when checksum correction is on)
    pub fn checksum(mut self, checksum: u16) -> Self {
        self.checksum = checksum;
        self
    }

    /// Use an already-built body
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = BuilderPayload::Packet(payload);
        self
    }

    /// Nest a pending builder as the body
    pub fn payload_builder(mut self, builder: impl Into<crate::packet::AnyBuilder>) -> Self {
        self.payload = BuilderPayload::Builder(Box::new(builder.into()));
        self
    }

    /// Compute the checksum over the whole message at build time
    pub fn correct_checksum_at_build(mut self, on: bool) -> Self {
        self.correct_checksum_at_build = on;
        self
    }

    /// The nested payload slot
    pub fn payload_mut(&mut self) -> &mut BuilderPayload {
        &mut self.payload
    }

    /// Build the message
    pub fn build(&self) -> Result<IcmpV4Packet> {
        let payload = self.payload.build()?;

        let mut header = IcmpV4Header {
            icmp_type: self.icmp_type.clone(),
            code: self.code.clone(),
            checksum: self.checksum,
        };

        if self.correct_checksum_at_build {
            header.checksum = 0;
            let mut message = header.to_bytes();
            message.extend_from_slice(&payload.to_bytes());
            header.checksum = internet_checksum(&message);
        }

        Ok(IcmpV4Packet { header, payload })
    }
}

impl Default for IcmpV4Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Echo / echo-reply body header: identifier and sequence number
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IcmpEchoHeader {
    /// Identifier, usually the sender's process id
    pub identifier: u16,
    /// Sequence number
    pub sequence_number: u16,
}

impl IcmpEchoHeader {
    /// Header size in bytes
    pub const LEN: usize = 4;

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
        buf.put_u16(self.identifier);
        buf.put_u16(self.sequence_number);
        buf.to_vec()
    }

    fn from_bytes(raw: &[u8], what: &str) -> Result<Self> {
        if raw.len() < Self::LEN {
            return Err(Error::illegal_raw_data(format!(
                "{} body too short: {} bytes, need {}",
                what,
                raw.len(),
                Self::LEN
            )));
        }
        Ok(Self {
            identifier: u16::from_be_bytes([raw[0], raw[1]]),
            sequence_number: u16::from_be_bytes([raw[2], raw[3]]),
        })
    }
}

macro_rules! echo_packet {
    (
        $(#[$m:meta])*
        $packet:ident, $builder:ident, $what:literal
    ) => {
        $(#[$m])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $packet {
            header: IcmpEchoHeader,
            payload: Payload,
        }

        impl $packet {
            /// Decode the body; trailing data stays raw
            pub fn from_bytes(raw: &[u8]) -> Result<Self> {
                let header = IcmpEchoHeader::from_bytes(raw, $what)?;
                let data = &raw[IcmpEchoHeader::LEN..];
                let payload = if data.is_empty() {
                    Payload::None
                } else {
                    Payload::Unknown(UnknownPacket::new(data))
                };
                Ok(Self { header, payload })
            }

            /// The body header
            pub fn header(&self) -> &IcmpEchoHeader {
                &self.header
            }

            /// The echo data
            pub fn payload(&self) -> &Payload {
                &self.payload
            }

            /// Total body length in bytes
            pub fn len(&self) -> usize {
                self.header.len() + self.payload.len()
            }

            /// Bodies are never empty
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
            pub fn builder() -> $builder {
                $builder::new()
            }

            /// A builder preloaded with this body's fields
            pub fn to_builder(&self) -> $builder {
                $builder {
                    identifier: self.header.identifier,
                    sequence_number: self.header.sequence_number,
                    payload: BuilderPayload::Packet(self.payload.clone()),
                }
            }
        }

        #[doc = concat!("Builder for [`", stringify!($packet), "`]")]
        #[derive(Clone, Debug, Default)]
        pub struct $builder {
            identifier: u16,
            sequence_number: u16,
            payload: BuilderPayload,
        }

        impl $builder {
            /// A builder with zero identifier and sequence number
            pub fn new() -> Self {
                Self::default()
            }

            /// Set the identifier
            pub fn identifier(mut self, identifier: u16) -> Self {
                self.identifier = identifier;
                self
            }

            /// Set the sequence number
            pub fn sequence_number(mut self, sequence_number: u16) -> Self {
                self.sequence_number = sequence_number;
                self
            }

            /// Use an already-built echo data payload
            pub fn payload(mut self, payload: Payload) -> Self {
                self.payload = BuilderPayload::Packet(payload);
                self
            }

            /// The nested payload slot
            pub fn payload_mut(&mut self) -> &mut BuilderPayload {
                &mut self.payload
            }

            /// Build the body
            pub fn build(&self) -> Result<$packet> {
                Ok($packet {
                    header: IcmpEchoHeader {
                        identifier: self.identifier,
                        sequence_number: self.sequence_number,
                    },
                    payload: self.payload.build()?,
                })
            }
        }
    };
}

echo_packet!(
    /// ICMPv4 echo body
    IcmpV4EchoPacket, IcmpV4EchoBuilder, "ICMPv4 echo"
);
echo_packet!(
    /// ICMPv4 echo reply body
    IcmpV4EchoReplyPacket, IcmpV4EchoReplyBuilder, "ICMPv4 echo reply"
);

pub(crate) fn decode(raw: &[u8], factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::IcmpV4(Box::new(IcmpV4Packet::from_bytes(
        raw, factories,
    )?)))
}

pub(crate) fn decode_echo(raw: &[u8], _factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::IcmpV4Echo(Box::new(IcmpV4EchoPacket::from_bytes(
        raw,
    )?)))
}

pub(crate) fn decode_echo_reply(raw: &[u8], _factories: &PacketFactories) -> Result<Payload> {
    Ok(Payload::IcmpV4EchoReply(Box::new(
        IcmpV4EchoReplyPacket::from_bytes(raw)?,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::validate_checksum;
    use crate::factory::PacketFactories;

    fn factories() -> PacketFactories {
        PacketFactories::statically_bound()
    }

    fn echo_message() -> IcmpV4Packet {
        IcmpV4Builder::new()
            .icmp_type(IcmpV4Type::ECHO)
            .payload_builder(
                IcmpV4EchoBuilder::new()
                    .identifier(0x4242)
                    .sequence_number(1)
                    .payload(Payload::Unknown(UnknownPacket::new(b"ping data"))),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_echo_roundtrip() {
        let message = echo_message();
        let bytes = message.to_bytes();
        let decoded = IcmpV4Packet::from_bytes(&bytes, &factories()).unwrap();
        assert_eq!(message, decoded);
        assert_eq!(decoded.to_bytes(), bytes);

        let echo = match decoded.payload() {
            Payload::IcmpV4Echo(e) => e,
            other => panic!("expected echo body, got {:?}", other),
        };
        assert_eq!(echo.header().identifier, 0x4242);
        assert_eq!(echo.header().sequence_number, 1);
    }

    #[test]
    fn test_checksum_covers_whole_message() {
        let message = echo_message();
        assert!(validate_checksum(&message.to_bytes()));
    }

    #[test]
    fn test_zeroed_checksum_corrects_to_original() {
        let message = echo_message();
        let zeroed = message
            .to_builder()
            .checksum(0)
            .correct_checksum_at_build(true)
            .build()
            .unwrap();
        assert_eq!(
            zeroed.header().checksum,
            message.header().checksum
        );
    }

    #[test]
    fn test_truncated_body_rejected() {
        assert!(IcmpV4EchoPacket::from_bytes(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(IcmpV4Packet::from_bytes(&[8, 0], &factories()).is_err());
    }

    #[test]
    fn test_unhandled_type_body_is_unknown() {
        // Destination Unreachable has no decoder in the compiled-in table
        let message = IcmpV4Builder::new()
            .icmp_type(IcmpV4Type::DESTINATION_UNREACHABLE)
            .code(IcmpV4Code::PORT_UNREACHABLE)
            .payload(Payload::Unknown(UnknownPacket::new(&[0u8; 8])))
            .build()
            .unwrap();
        let decoded = IcmpV4Packet::from_bytes(&message.to_bytes(), &factories()).unwrap();
        assert!(matches!(decoded.payload(), Payload::Unknown(_)));
    }
}
