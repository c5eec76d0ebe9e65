//! Numbered protocol constants
//!
//! Every protocol field that carries a registered number (EtherType, IP
//! protocol number, ARP operation, port, ...) is represented by a dedicated
//! type wrapping the scalar value plus a display name. Lookups are total:
//! a value missing from the registry yields a synthetic "unknown" instance
//! carrying the raw value, never an error.
//!
//! Each family's registry is seeded once from a compile-time constant table
//! and is append-only afterwards; [`register`](EtherType::register) may be
//! called concurrently with lookups.
//!
//! Equality, ordering, and hashing operate on the numeric value alone, so a
//! custom-registered constant compares equal to the wire value it stands
//! for.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use once_cell::sync::Lazy;

macro_rules! named_number {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty, $fmt:literal) {
            $( $(#[$cmeta:meta])* $const_name:ident = $value:expr => $display:expr; )*
        }
    ) => {
        named_number! {
            $(#[$meta])*
            $name($repr, $fmt, max = <$repr>::MAX) {
                $( $(#[$cmeta])* $const_name = $value => $display; )*
            }
        }
    };
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty, $fmt:literal, max = $max:expr) {
            $( $(#[$cmeta:meta])* $const_name:ident = $value:expr => $display:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            value: $repr,
            name: Cow<'static, str>,
        }

        impl $name {
            $(
                $(#[$cmeta])*
                pub const $const_name: $name = $name {
                    value: $value,
                    name: Cow::Borrowed($display),
                };
            )*

            fn registry() -> &'static DashMap<$repr, $name> {
                static REGISTRY: Lazy<DashMap<$repr, $name>> = Lazy::new(|| {
                    let map = DashMap::new();
                    $( map.insert($value, $name::$const_name); )*
                    map
                });
                &REGISTRY
            }

            /// Create a constant with a custom name.
            ///
            /// # Panics
            ///
            /// Panics if `value` exceeds the declared bit width of this
            /// family. That is a precondition violation, not a recoverable
            /// error.
            pub const fn new(value: $repr, name: &'static str) -> Self {
                assert!(value <= $max, "value exceeds field width");
                Self {
                    value,
                    name: Cow::Borrowed(name),
                }
            }

            /// Look up the constant registered for `value`.
            ///
            /// Always succeeds: known values return the canonical named
            /// instance, unknown values return a synthetic instance named
            /// `unknown` wrapping the raw value.
            pub fn of(value: $repr) -> Self {
                assert!(value <= $max, "value exceeds field width");
                match Self::registry().get(&value) {
                    Some(entry) => entry.clone(),
                    None => Self {
                        value,
                        name: Cow::Borrowed("unknown"),
                    },
                }
            }

            /// Register (or overwrite) a constant for later [`of`](Self::of)
            /// lookups. Safe to call concurrently with lookups.
            pub fn register(constant: Self) {
                Self::registry().insert(constant.value, constant);
            }

            /// The underlying numeric value
            pub fn value(&self) -> $repr {
                self.value
            }

            /// The display name
            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.value == other.value
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.value.hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.value.cmp(&other.value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!("{} (", $fmt, ")"), self.name, self.value)
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                Self::of(value)
            }
        }
    };
}

named_number! {
    /// Data link type identifying the outermost layer of a raw buffer
    ///
    /// Values follow the tcpdump/libpcap DLT registry.
    DataLinkType(u16, "{}") {
        /// BSD loopback encapsulation (0)
        NULL = 0 => "NULL";
        /// Ethernet (1)
        ETHERNET = 1 => "Ethernet";
        /// PPP (9)
        PPP = 9 => "PPP";
        /// FDDI (10)
        FDDI = 10 => "FDDI";
        /// Raw IP, no link layer (101)
        RAW = 101 => "RAW";
        /// IEEE 802.11 wireless (105)
        IEEE802_11 = 105 => "IEEE 802.11";
        /// Linux cooked capture (113)
        LINUX_SLL = 113 => "Linux cooked";
    }
}

named_number! {
    /// EtherType values used in Ethernet II frames
    EtherType(u16, "0x{:04x}") {
        /// IPv4 (0x0800)
        IPV4 = 0x0800 => "IPv4";
        /// ARP (0x0806)
        ARP = 0x0806 => "ARP";
        /// RARP (0x8035)
        RARP = 0x8035 => "RARP";
        /// VLAN-tagged frame, 802.1Q (0x8100)
        DOT1Q = 0x8100 => "802.1Q VLAN";
        /// IPv6 (0x86dd)
        IPV6 = 0x86dd => "IPv6";
        /// MPLS unicast (0x8847)
        MPLS = 0x8847 => "MPLS";
        /// PPPoE Discovery (0x8863)
        PPPOE_DISCOVERY = 0x8863 => "PPPoE Discovery";
        /// PPPoE Session (0x8864)
        PPPOE_SESSION = 0x8864 => "PPPoE Session";
        /// Provider bridging, 802.1ad (0x88a8)
        QINQ = 0x88a8 => "802.1ad Q-in-Q";
        /// LLDP (0x88cc)
        LLDP = 0x88cc => "LLDP";
    }
}

named_number! {
    /// IP version number (4-bit field)
    IpVersion(u8, "{}", max = 0x0f) {
        /// IPv4 (4)
        IPV4 = 4 => "IPv4";
        /// IPv6 (6)
        IPV6 = 6 => "IPv6";
    }
}

named_number! {
    /// Assigned internet protocol numbers carried in the IPv4 protocol
    /// field and the IPv6 next-header field
    IpNumber(u8, "{}") {
        /// IPv6 Hop-by-Hop options (0)
        IPV6_HOPOPT = 0 => "IPv6 Hop-by-Hop";
        /// ICMPv4 (1)
        ICMPV4 = 1 => "ICMPv4";
        /// IGMP (2)
        IGMP = 2 => "IGMP";
        /// TCP (6)
        TCP = 6 => "TCP";
        /// UDP (17)
        UDP = 17 => "UDP";
        /// IPv6 Routing header (43)
        IPV6_ROUTE = 43 => "IPv6 Route";
        /// IPv6 Fragment header (44)
        IPV6_FRAGMENT = 44 => "IPv6 Fragment";
        /// GRE (47)
        GRE = 47 => "GRE";
        /// ESP (50)
        ESP = 50 => "ESP";
        /// AH (51)
        AH = 51 => "AH";
        /// ICMPv6 (58)
        ICMPV6 = 58 => "ICMPv6";
        /// IPv6 No Next Header (59)
        IPV6_NONXT = 59 => "IPv6 No Next Header";
        /// IPv6 Destination options (60)
        IPV6_DSTOPTS = 60 => "IPv6 Destination Options";
        /// EIGRP (88)
        EIGRP = 88 => "EIGRP";
        /// OSPF (89)
        OSPF = 89 => "OSPF";
        /// VRRP (112)
        VRRP = 112 => "VRRP";
    }
}

named_number! {
    /// ARP operation codes
    ArpOperation(u16, "{}") {
        /// ARP Request (1)
        REQUEST = 1 => "Request";
        /// ARP Reply (2)
        REPLY = 2 => "Reply";
        /// RARP Request (3)
        RARP_REQUEST = 3 => "RARP Request";
        /// RARP Reply (4)
        RARP_REPLY = 4 => "RARP Reply";
        /// InARP Request (8)
        INARP_REQUEST = 8 => "InARP Request";
        /// InARP Reply (9)
        INARP_REPLY = 9 => "InARP Reply";
    }
}

named_number! {
    /// ARP hardware types
    ArpHardwareType(u16, "{}") {
        /// Ethernet (1)
        ETHERNET = 1 => "Ethernet";
        /// IEEE 802 networks (6)
        IEEE802 = 6 => "IEEE 802";
        /// Frame Relay (15)
        FRAME_RELAY = 15 => "Frame Relay";
        /// ATM (16)
        ATM = 16 => "ATM";
        /// IPsec tunnel (31)
        IPSEC_TUNNEL = 31 => "IPsec tunnel";
    }
}

named_number! {
    /// ICMPv4 message types
    IcmpV4Type(u8, "{}") {
        /// Echo Reply (0)
        ECHO_REPLY = 0 => "Echo Reply";
        /// Destination Unreachable (3)
        DESTINATION_UNREACHABLE = 3 => "Destination Unreachable";
        /// Source Quench (4)
        SOURCE_QUENCH = 4 => "Source Quench";
        /// Redirect (5)
        REDIRECT = 5 => "Redirect";
        /// Echo (8)
        ECHO = 8 => "Echo";
        /// Time Exceeded (11)
        TIME_EXCEEDED = 11 => "Time Exceeded";
        /// Parameter Problem (12)
        PARAMETER_PROBLEM = 12 => "Parameter Problem";
        /// Timestamp (13)
        TIMESTAMP = 13 => "Timestamp";
        /// Timestamp Reply (14)
        TIMESTAMP_REPLY = 14 => "Timestamp Reply";
    }
}

named_number! {
    /// ICMPv4 message codes
    ///
    /// Code meanings depend on the message type; the names here are the
    /// common destination-unreachable assignments, the most frequently
    /// inspected family.
    IcmpV4Code(u8, "{}") {
        /// Network Unreachable (0)
        NETWORK_UNREACHABLE = 0 => "Network Unreachable";
        /// Host Unreachable (1)
        HOST_UNREACHABLE = 1 => "Host Unreachable";
        /// Protocol Unreachable (2)
        PROTOCOL_UNREACHABLE = 2 => "Protocol Unreachable";
        /// Port Unreachable (3)
        PORT_UNREACHABLE = 3 => "Port Unreachable";
        /// Fragmentation needed and DF set (4)
        FRAGMENTATION_NEEDED = 4 => "Fragmentation Needed";
        /// Source Route Failed (5)
        SOURCE_ROUTE_FAILED = 5 => "Source Route Failed";
    }
}

named_number! {
    /// TCP/UDP port numbers
    Port(u16, "{}") {
        /// FTP data (20)
        FTP_DATA = 20 => "FTP data";
        /// FTP control (21)
        FTP = 21 => "FTP";
        /// SSH (22)
        SSH = 22 => "SSH";
        /// Telnet (23)
        TELNET = 23 => "Telnet";
        /// SMTP (25)
        SMTP = 25 => "SMTP";
        /// DNS (53)
        DNS = 53 => "DNS";
        /// DHCP server (67)
        DHCP_SERVER = 67 => "DHCP server";
        /// DHCP client (68)
        DHCP_CLIENT = 68 => "DHCP client";
        /// HTTP (80)
        HTTP = 80 => "HTTP";
        /// NTP (123)
        NTP = 123 => "NTP";
        /// SNMP (161)
        SNMP = 161 => "SNMP";
        /// HTTPS (443)
        HTTPS = 443 => "HTTPS";
        /// Syslog (514)
        SYSLOG = 514 => "Syslog";
    }
}

named_number! {
    /// TCP option kinds
    TcpOptionKind(u8, "{}") {
        /// End of option list (0)
        END_OF_OPTION_LIST = 0 => "End of Option List";
        /// No operation (1)
        NO_OPERATION = 1 => "No Operation";
        /// Maximum segment size (2)
        MAXIMUM_SEGMENT_SIZE = 2 => "Maximum Segment Size";
        /// Window scale (3)
        WINDOW_SCALE = 3 => "Window Scale";
        /// SACK permitted (4)
        SACK_PERMITTED = 4 => "SACK Permitted";
        /// SACK (5)
        SACK = 5 => "SACK";
        /// Timestamps (8)
        TIMESTAMPS = 8 => "Timestamps";
    }
}
