//! Factory dispatch: mapping protocol numbers to concrete decoders
//!
//! A [`DispatchTable`] maps the values of one numbered-constant family to
//! decode functions. Dispatch is total: numbers are tried in caller order,
//! the first bound decoder wins, an unbound number falls back to an
//! unknown-data terminal, and a decoder failure is contained here as an
//! illegal-data terminal instead of propagating.
//!
//! Three interchangeable bindings produce the tables: the compiled-in
//! [`StaticProvider`] (the default), the JSON-driven
//! [`PropertiesProvider`], and any external [`FactoryProvider`]
//! implementation chosen at composition time and passed by reference.
//! Resolution per [`FactoryKey`] is cached in a shared [`FactoryCache`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use lamina_core::{
    DataLinkType, Error, EtherType, IcmpV4Type, IpNumber, Port, Result,
};

use crate::packet::Payload;
use crate::unknown::{IllegalPacket, UnknownPacket};
use crate::{arp, ethernet, icmpv4, ipv4, ipv6, tcp, udp};

/// A decode entry point: raw bytes plus the active factories in, a payload
/// out
pub type DecodeFn = fn(&[u8], &PacketFactories) -> Result<Payload>;

/// Value-to-decoder table for one numbered-constant family
#[derive(Clone)]
pub struct DispatchTable<N: Eq + Hash> {
    entries: HashMap<N, DecodeFn>,
}

impl<N: Eq + Hash + fmt::Display> DispatchTable<N> {
    /// An empty table; every lookup falls back to unknown
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// A table preloaded with entries
    pub fn with_entries(entries: impl IntoIterator<Item = (N, DecodeFn)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Bind (or rebind) a decoder to a number
    pub fn insert(&mut self, number: N, decode: DecodeFn) {
        self.entries.insert(number, decode);
    }

    /// Number of bound decoders
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no decoder is bound
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode `raw` by the first of `numbers` that maps to a bound decoder
    ///
    /// Total over all inputs: no bound number (or an empty `numbers`)
    /// yields an unknown terminal spanning exactly `raw`, and a decoder
    /// error yields an illegal-data terminal carrying `raw` and the
    /// failure reason.
    pub fn new_packet(&self, raw: &[u8], factories: &PacketFactories, numbers: &[N]) -> Payload {
        for number in numbers {
            if let Some(decode) = self.entries.get(number) {
                return match decode(raw, factories) {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(number = %number, error = %e, "decode failed, marking illegal");
                        Payload::Illegal(IllegalPacket::new(raw, e.to_string()))
                    }
                };
            }
        }
        trace!("no decoder bound, wrapping {} bytes as unknown", raw.len());
        Payload::Unknown(UnknownPacket::new(raw))
    }
}

impl<N: Eq + Hash> fmt::Debug for DispatchTable<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// The packet family a factory produces decoders for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketTarget {
    /// Link layer, entered with a capture's link-type hint
    Link,
    /// Network layer below Ethernet
    Network,
    /// Transport layer below IP
    Transport,
    /// ICMPv4 message bodies
    IcmpBody,
    /// Application layer below TCP/UDP
    Application,
}

/// The numbered-constant family a factory is keyed by
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumberFamily {
    /// [`DataLinkType`] values
    DataLinkType,
    /// [`EtherType`] values
    EtherType,
    /// [`IpNumber`] values
    IpNumber,
    /// [`IcmpV4Type`] values
    IcmpV4Type,
    /// [`Port`] values
    Port,
}

/// Identifies one dispatch table: what it produces, keyed by what
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FactoryKey {
    /// Target packet family
    pub target: PacketTarget,
    /// Keying number family
    pub number: NumberFamily,
}

impl FactoryKey {
    /// The link-layer entry table
    pub const LINK: FactoryKey = FactoryKey {
        target: PacketTarget::Link,
        number: NumberFamily::DataLinkType,
    };
    /// The EtherType table
    pub const ETHER_TYPE: FactoryKey = FactoryKey {
        target: PacketTarget::Network,
        number: NumberFamily::EtherType,
    };
    /// The IP protocol number table
    pub const IP_NUMBER: FactoryKey = FactoryKey {
        target: PacketTarget::Transport,
        number: NumberFamily::IpNumber,
    };
    /// The ICMPv4 type table
    pub const ICMPV4_TYPE: FactoryKey = FactoryKey {
        target: PacketTarget::IcmpBody,
        number: NumberFamily::IcmpV4Type,
    };
    /// The port table
    pub const PORT: FactoryKey = FactoryKey {
        target: PacketTarget::Application,
        number: NumberFamily::Port,
    };
}

/// A resolved factory, typed by its keying family
#[derive(Clone)]
pub enum FactoryHandle {
    /// Link-layer table
    DataLinkType(Arc<DispatchTable<DataLinkType>>),
    /// EtherType table
    EtherType(Arc<DispatchTable<EtherType>>),
    /// IP protocol number table
    IpNumber(Arc<DispatchTable<IpNumber>>),
    /// ICMPv4 type table
    IcmpV4Type(Arc<DispatchTable<IcmpV4Type>>),
    /// Port table
    Port(Arc<DispatchTable<Port>>),
}

impl fmt::Debug for FactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FactoryHandle::DataLinkType(_) => "DataLinkType",
            FactoryHandle::EtherType(_) => "EtherType",
            FactoryHandle::IpNumber(_) => "IpNumber",
            FactoryHandle::IcmpV4Type(_) => "IcmpV4Type",
            FactoryHandle::Port(_) => "Port",
        };
        write!(f, "FactoryHandle::{}", name)
    }
}

/// One binding of numbers to decoders
///
/// The active provider is chosen when the [`Codec`] is composed and passed
/// by reference; there is no hidden process-wide default.
pub trait FactoryProvider: Send + Sync {
    /// Resolve the factory for one key
    ///
    /// Fails with [`Error::FactoryConfig`] for a key this binding does not
    /// serve.
    fn resolve(&self, key: FactoryKey) -> Result<FactoryHandle>;
}

/// Shared cache of resolved factories
///
/// Safe for concurrent lookup and insert; a race resolving the same key
/// twice is benign since both resolutions produce the same table.
pub struct FactoryCache {
    provider: Arc<dyn FactoryProvider>,
    cache: DashMap<FactoryKey, FactoryHandle>,
}

impl FactoryCache {
    /// A cache over the given provider
    pub fn new(provider: Arc<dyn FactoryProvider>) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
        }
    }

    /// Resolve a key, consulting the provider only on first use
    pub fn resolve(&self, key: FactoryKey) -> Result<FactoryHandle> {
        if let Some(handle) = self.cache.get(&key) {
            return Ok(handle.clone());
        }
        let handle = self.provider.resolve(key)?;
        self.cache.insert(key, handle.clone());
        Ok(handle)
    }

    /// Number of resolved keys
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True before the first resolution
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// The resolved set of dispatch tables threaded through decoding
#[derive(Clone, Debug)]
pub struct PacketFactories {
    link: Arc<DispatchTable<DataLinkType>>,
    ether: Arc<DispatchTable<EtherType>>,
    ip: Arc<DispatchTable<IpNumber>>,
    icmpv4: Arc<DispatchTable<IcmpV4Type>>,
    port: Arc<DispatchTable<Port>>,
}

impl PacketFactories {
    /// The compiled-in binding, resolved without a provider
    pub fn statically_bound() -> Self {
        Self {
            link: Arc::new(StaticProvider::link_table()),
            ether: Arc::new(StaticProvider::ether_type_table()),
            ip: Arc::new(StaticProvider::ip_number_table()),
            icmpv4: Arc::new(StaticProvider::icmpv4_type_table()),
            port: Arc::new(StaticProvider::port_table()),
        }
    }

    /// Resolve all tables through a cache
    pub fn from_cache(cache: &FactoryCache) -> Result<Self> {
        fn mismatch(key: FactoryKey) -> Error {
            Error::FactoryConfig(format!("provider returned a mismatched table for {:?}", key))
        }

        let link = match cache.resolve(FactoryKey::LINK)? {
            FactoryHandle::DataLinkType(t) => t,
            _ => return Err(mismatch(FactoryKey::LINK)),
        };
        let ether = match cache.resolve(FactoryKey::ETHER_TYPE)? {
            FactoryHandle::EtherType(t) => t,
            _ => return Err(mismatch(FactoryKey::ETHER_TYPE)),
        };
        let ip = match cache.resolve(FactoryKey::IP_NUMBER)? {
            FactoryHandle::IpNumber(t) => t,
            _ => return Err(mismatch(FactoryKey::IP_NUMBER)),
        };
        let icmpv4 = match cache.resolve(FactoryKey::ICMPV4_TYPE)? {
            FactoryHandle::IcmpV4Type(t) => t,
            _ => return Err(mismatch(FactoryKey::ICMPV4_TYPE)),
        };
        let port = match cache.resolve(FactoryKey::PORT)? {
            FactoryHandle::Port(t) => t,
            _ => return Err(mismatch(FactoryKey::PORT)),
        };

        Ok(Self {
            link,
            ether,
            ip,
            icmpv4,
            port,
        })
    }

    /// The link-layer table
    pub fn link(&self) -> &DispatchTable<DataLinkType> {
        &self.link
    }

    /// The EtherType table
    pub fn ether_type(&self) -> &DispatchTable<EtherType> {
        &self.ether
    }

    /// The IP protocol number table
    pub fn ip_number(&self) -> &DispatchTable<IpNumber> {
        &self.ip
    }

    /// The ICMPv4 type table
    pub fn icmpv4_type(&self) -> &DispatchTable<IcmpV4Type> {
        &self.icmpv4
    }

    /// The port table
    pub fn port(&self) -> &DispatchTable<Port> {
        &self.port
    }
}

/// Raw-IP link decode: sniff the version nibble
fn decode_raw_ip(raw: &[u8], factories: &PacketFactories) -> Result<Payload> {
    let version = raw
        .first()
        .map(|b| b >> 4)
        .ok_or_else(|| Error::illegal_raw_data("empty raw IP packet"))?;
    match version {
        4 => ipv4::decode(raw, factories),
        6 => ipv6::decode(raw, factories),
        v => Err(Error::illegal_raw_data(format!(
            "raw IP packet with unknown version {}",
            v
        ))),
    }
}

/// The compiled-in binding: direct value-to-decoder tables, no runtime
/// configuration
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticProvider;

impl StaticProvider {
    fn link_table() -> DispatchTable<DataLinkType> {
        DispatchTable::with_entries([
            (DataLinkType::ETHERNET, ethernet::decode as DecodeFn),
            (DataLinkType::RAW, decode_raw_ip as DecodeFn),
        ])
    }

    fn ether_type_table() -> DispatchTable<EtherType> {
        DispatchTable::with_entries([
            (EtherType::IPV4, ipv4::decode as DecodeFn),
            (EtherType::ARP, arp::decode as DecodeFn),
            (EtherType::IPV6, ipv6::decode as DecodeFn),
        ])
    }

    fn ip_number_table() -> DispatchTable<IpNumber> {
        DispatchTable::with_entries([
            (IpNumber::TCP, tcp::decode as DecodeFn),
            (IpNumber::UDP, udp::decode as DecodeFn),
            (IpNumber::ICMPV4, icmpv4::decode as DecodeFn),
            (IpNumber::IPV6_FRAGMENT, ipv6::decode_fragment as DecodeFn),
        ])
    }

    fn icmpv4_type_table() -> DispatchTable<IcmpV4Type> {
        DispatchTable::with_entries([
            (IcmpV4Type::ECHO, icmpv4::decode_echo as DecodeFn),
            (
                IcmpV4Type::ECHO_REPLY,
                icmpv4::decode_echo_reply as DecodeFn,
            ),
        ])
    }

    fn port_table() -> DispatchTable<Port> {
        // no application decoders compiled in; bind them via properties or
        // a custom provider
        DispatchTable::new()
    }
}

impl FactoryProvider for StaticProvider {
    fn resolve(&self, key: FactoryKey) -> Result<FactoryHandle> {
        match key {
            FactoryKey::LINK => Ok(FactoryHandle::DataLinkType(Arc::new(Self::link_table()))),
            FactoryKey::ETHER_TYPE => {
                Ok(FactoryHandle::EtherType(Arc::new(Self::ether_type_table())))
            }
            FactoryKey::IP_NUMBER => {
                Ok(FactoryHandle::IpNumber(Arc::new(Self::ip_number_table())))
            }
            FactoryKey::ICMPV4_TYPE => Ok(FactoryHandle::IcmpV4Type(Arc::new(
                Self::icmpv4_type_table(),
            ))),
            FactoryKey::PORT => Ok(FactoryHandle::Port(Arc::new(Self::port_table()))),
            other => Err(Error::FactoryConfig(format!(
                "no compiled-in factory for {:?}",
                other
            ))),
        }
    }
}

fn decoder_by_name(name: &str) -> Result<DecodeFn> {
    Ok(match name {
        "ethernet" => ethernet::decode,
        "arp" => arp::decode,
        "ipv4" => ipv4::decode,
        "ipv6" => ipv6::decode,
        "ipv6-fragment" => ipv6::decode_fragment,
        "icmpv4" => icmpv4::decode,
        "icmpv4-echo" => icmpv4::decode_echo,
        "icmpv4-echo-reply" => icmpv4::decode_echo_reply,
        "tcp" => tcp::decode,
        "udp" => udp::decode,
        "raw-ip" => decode_raw_ip,
        other => {
            return Err(Error::FactoryConfig(format!(
                "unknown decoder name '{}'",
                other
            )))
        }
    })
}

fn parse_value(s: &str, family: &str) -> Result<u32> {
    let trimmed = s.trim();
    let parsed = if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        trimmed.parse()
    };
    parsed.map_err(|_| {
        Error::FactoryConfig(format!("bad {} value '{}' in properties", family, s))
    })
}

fn parse_value_u16(s: &str, family: &str) -> Result<u16> {
    let value = parse_value(s, family)?;
    u16::try_from(value)
        .map_err(|_| Error::FactoryConfig(format!("{} value '{}' exceeds 16 bits", family, s)))
}

fn parse_value_u8(s: &str, family: &str) -> Result<u8> {
    let value = parse_value(s, family)?;
    u8::try_from(value)
        .map_err(|_| Error::FactoryConfig(format!("{} value '{}' exceeds 8 bits", family, s)))
}

/// The property-driven binding: value-to-decoder mappings loaded from a
/// JSON document, enabling substitution without recompilation
///
/// ```json
/// {
///     "ether_type": { "0x0800": "ipv4", "0x0806": "arp" },
///     "ip_number": { "6": "tcp", "17": "udp" }
/// }
/// ```
///
/// Families absent from the document get an empty table, so everything
/// under them decodes as unknown.
#[derive(Debug)]
pub struct PropertiesProvider {
    link: Arc<DispatchTable<DataLinkType>>,
    ether: Arc<DispatchTable<EtherType>>,
    ip: Arc<DispatchTable<IpNumber>>,
    icmpv4: Arc<DispatchTable<IcmpV4Type>>,
    port: Arc<DispatchTable<Port>>,
}

impl PropertiesProvider {
    /// Parse a properties document
    pub fn from_json(json: &str) -> Result<Self> {
        let families: HashMap<String, HashMap<String, String>> = serde_json::from_str(json)
            .map_err(|e| Error::FactoryConfig(format!("bad properties JSON: {}", e)))?;

        let mut link = DispatchTable::new();
        let mut ether = DispatchTable::new();
        let mut ip = DispatchTable::new();
        let mut icmpv4 = DispatchTable::new();
        let mut port = DispatchTable::new();

        for (family, entries) in &families {
            match family.as_str() {
                "data_link_type" => {
                    for (value, name) in entries {
                        link.insert(
                            DataLinkType::of(parse_value_u16(value, family)?),
                            decoder_by_name(name)?,
                        );
                    }
                }
                "ether_type" => {
                    for (value, name) in entries {
                        ether.insert(
                            EtherType::of(parse_value_u16(value, family)?),
                            decoder_by_name(name)?,
                        );
                    }
                }
                "ip_number" => {
                    for (value, name) in entries {
                        ip.insert(
                            IpNumber::of(parse_value_u8(value, family)?),
                            decoder_by_name(name)?,
                        );
                    }
                }
                "icmpv4_type" => {
                    for (value, name) in entries {
                        icmpv4.insert(
                            IcmpV4Type::of(parse_value_u8(value, family)?),
                            decoder_by_name(name)?,
                        );
                    }
                }
                "port" => {
                    for (value, name) in entries {
                        port.insert(
                            Port::of(parse_value_u16(value, family)?),
                            decoder_by_name(name)?,
                        );
                    }
                }
                other => {
                    return Err(Error::FactoryConfig(format!(
                        "unknown number family '{}' in properties",
                        other
                    )))
                }
            }
        }

        Ok(Self {
            link: Arc::new(link),
            ether: Arc::new(ether),
            ip: Arc::new(ip),
            icmpv4: Arc::new(icmpv4),
            port: Arc::new(port),
        })
    }
}

impl FactoryProvider for PropertiesProvider {
    fn resolve(&self, key: FactoryKey) -> Result<FactoryHandle> {
        match key {
            FactoryKey::LINK => Ok(FactoryHandle::DataLinkType(self.link.clone())),
            FactoryKey::ETHER_TYPE => Ok(FactoryHandle::EtherType(self.ether.clone())),
            FactoryKey::IP_NUMBER => Ok(FactoryHandle::IpNumber(self.ip.clone())),
            FactoryKey::ICMPV4_TYPE => Ok(FactoryHandle::IcmpV4Type(self.icmpv4.clone())),
            FactoryKey::PORT => Ok(FactoryHandle::Port(self.port.clone())),
            other => Err(Error::FactoryConfig(format!(
                "no property-driven factory for {:?}",
                other
            ))),
        }
    }
}

/// The composition root: a decode entry point over one resolved binding
///
/// This is the boundary toward the capture collaborator: it consumes raw
/// bytes plus a link-type hint and produces a decoded payload chain.
#[derive(Clone, Debug)]
pub struct Codec {
    factories: PacketFactories,
}

impl Codec {
    /// Compose a codec over an explicit binding
    pub fn new(provider: Arc<dyn FactoryProvider>) -> Result<Self> {
        let cache = FactoryCache::new(provider);
        Ok(Self {
            factories: PacketFactories::from_cache(&cache)?,
        })
    }

    /// Compose a codec over the compiled-in binding
    pub fn with_defaults() -> Self {
        Self {
            factories: PacketFactories::statically_bound(),
        }
    }

    /// The resolved tables, for decoding below the link layer directly
    pub fn factories(&self) -> &PacketFactories {
        &self.factories
    }

    /// Decode a raw capture buffer using its link-type hint
    ///
    /// Total: any byte buffer of any content produces some payload chain,
    /// with illegal and unknown regions marked rather than erroring.
    pub fn decode(&self, raw: &[u8], link_type: DataLinkType) -> Payload {
        self.factories
            .link()
            .new_packet(raw, &self.factories, &[link_type])
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::with_defaults()
    }
}
