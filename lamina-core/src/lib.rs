//! Core types for lamina
//!
//! This crate provides the foundation shared by every lamina crate:
//!
//! - [`Error`] and [`Result`] - the common error type
//! - [`types`] - value types such as [`MacAddr`]
//! - [`number`] - the numbered-constant registry: type-safe, extensible
//!   wrappers around protocol field values (EtherTypes, IP protocol
//!   numbers, ports, ...) with a well-known "unknown" fallback

pub mod error;
pub mod number;
pub mod types;

pub use error::{Error, Result};
pub use number::{
    ArpHardwareType, ArpOperation, DataLinkType, EtherType, IcmpV4Code, IcmpV4Type, IpNumber,
    IpVersion, Port, TcpOptionKind,
};
pub use types::MacAddr;
