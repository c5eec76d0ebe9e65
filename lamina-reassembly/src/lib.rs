//! Reassembly algorithms for lamina
//!
//! Two stateful reconstructions over already-decoded packets:
//!
//! - [`fragment`] - splitting an IPv4 packet under a path MTU and putting
//!   fragment sets (IPv4 or IPv6) back together, in pure-function form
//!   ([`defragment`], [`defragment_v6`]) and as the group-tracking
//!   [`Defragmenter`]
//! - [`stream`] - per-connection TCP stream reassembly from out-of-order
//!   captured segments

pub mod fragment;
pub mod stream;

pub use fragment::{defragment, defragment_v6, fragment, Defragmenter, FragmentKey, Fragments};
pub use stream::{
    SessionState, StreamAssembler, StreamDirection, StreamListener, TcpSession, TcpSessionKey,
};
