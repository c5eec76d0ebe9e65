//! IP fragmentation and defragmentation
//!
//! [`fragment`] splits an IPv4 packet so every piece fits under a path MTU;
//! [`defragment`] and [`defragment_v6`] put a complete fragment set back
//! together regardless of arrival order. The pure functions require a
//! complete set: a gap in the offsets is a precondition violation, not a
//! detected error. The stateful [`Defragmenter`] collects fragments into
//! groups keyed by (source, destination, identification) and emits a
//! reassembled packet once the terminal fragment has arrived and the
//! offsets coalesce to full coverage.
//!
//! Overlapping fragments silently overwrite: iteration is in
//! ascending-offset order (ties keep input order) and the later copy wins.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, trace, warn};

use lamina_core::{Error, Result};
use lamina_packet::{
    Ipv4Packet, Ipv6Packet, PacketFactories, Payload, UnknownPacket,
};

/// Lazy sequence of IPv4 fragments, produced by [`fragment`]
///
/// Finite and non-restartable: each fragment is materialized once, on
/// demand.
pub struct Fragments<'a> {
    packet: &'a Ipv4Packet,
    payload: Vec<u8>,
    chunk: usize,
    cursor: usize,
    done: bool,
    whole: bool,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Result<Ipv4Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.whole {
            self.done = true;
            return Some(Ok(self.packet.clone()));
        }

        let start = self.cursor;
        let end = (start + self.chunk).min(self.payload.len());
        let last = end == self.payload.len();
        self.cursor = end;
        self.done = last;

        let offset_units = self.packet.header().fragment_offset + (start / 8) as u16;
        let built = self
            .packet
            .to_builder()
            .fragment_offset(offset_units)
            .more_fragment_flag(!last || self.packet.header().more_fragment_flag)
            .payload(Payload::Unknown(UnknownPacket::new(
                &self.payload[start..end],
            )))
            .correct_length_at_build(true)
            .correct_checksum_at_build(true)
            .build();

        Some(built)
    }
}

/// Split an IPv4 packet into fragments of at most `mtu` bytes each
///
/// The payload is cut into chunks of the largest multiple of 8 bytes that
/// still fits beside the header; every fragment carries a full copy of the
/// header with adjusted offset and More Fragments flag (cleared on the
/// last), recomputed length, and recomputed checksum. A packet already
/// within `mtu` comes back as a single unchanged fragment.
pub fn fragment(packet: &Ipv4Packet, mtu: usize) -> Result<Fragments<'_>> {
    let header_len = packet.header().len();
    let payload = packet.payload().to_bytes();

    if packet.len() <= mtu {
        // already fits; a one-element sequence with the packet unchanged
        return Ok(Fragments {
            packet,
            payload,
            chunk: 0,
            cursor: 0,
            done: false,
            whole: true,
        });
    }

    if mtu < header_len + 8 {
        return Err(Error::Fragmentation(format!(
            "MTU {} cannot fit the {}-byte header plus one 8-byte block",
            mtu, header_len
        )));
    }

    let chunk = ((mtu - header_len) / 8) * 8;
    trace!(chunk, payload = payload.len(), "fragmenting");

    Ok(Fragments {
        packet,
        payload,
        chunk,
        cursor: 0,
        done: false,
        whole: false,
    })
}

fn check_same_datagram(
    key: Option<(IpAddr, IpAddr, u32)>,
    other: (IpAddr, IpAddr, u32),
) -> Result<(IpAddr, IpAddr, u32)> {
    match key {
        None => Ok(other),
        Some(key) if key == other => Ok(key),
        Some(_) => Err(Error::Fragmentation(
            "fragments belong to different datagrams".into(),
        )),
    }
}

/// Reassemble a complete IPv4 fragment set into the original packet
///
/// Fragments may arrive in any order and may duplicate or overlap; they
/// are laid out in ascending-offset order and later bytes overwrite
/// earlier ones. Exactly one fragment must have the More Fragments flag
/// clear; its offset plus length fixes the total payload size. The set
/// must be complete: missing ranges are a precondition violation and the
/// bytes of a gap are unspecified.
///
/// The reassembled payload is decoded again through `factories`, so an
/// inner TCP/UDP/ICMP unit becomes typed.
pub fn defragment(fragments: &[Ipv4Packet], factories: &PacketFactories) -> Result<Ipv4Packet> {
    if fragments.is_empty() {
        return Err(Error::Fragmentation("no fragments to reassemble".into()));
    }

    let mut key = None;
    for fragment in fragments {
        let header = fragment.header();
        key = Some(check_same_datagram(
            key,
            (
                IpAddr::V4(header.src_addr),
                IpAddr::V4(header.dst_addr),
                header.identification as u32,
            ),
        )?);
    }

    let terminals: Vec<&Ipv4Packet> = fragments
        .iter()
        .filter(|f| !f.header().more_fragment_flag)
        .collect();
    if terminals.len() != 1 {
        return Err(Error::Fragmentation(format!(
            "need exactly one terminal fragment, got {}",
            terminals.len()
        )));
    }
    let terminal = terminals[0];
    let total =
        terminal.header().fragment_byte_offset() + terminal.payload().to_bytes().len();

    let mut order: Vec<usize> = (0..fragments.len()).collect();
    order.sort_by_key(|&i| fragments[i].header().fragment_offset);

    let mut buffer = vec![0u8; total];
    for i in order {
        let fragment = &fragments[i];
        let offset = fragment.header().fragment_byte_offset();
        let data = fragment.payload().to_bytes();
        let end = (offset + data.len()).min(total);
        if offset < end {
            buffer[offset..end].copy_from_slice(&data[..end - offset]);
        }
    }

    // the lowest-offset fragment donates the header fields
    let template = fragments
        .iter()
        .min_by_key(|f| f.header().fragment_offset)
        .map(|f| f.header())
        .ok_or_else(|| Error::Fragmentation("no fragments to reassemble".into()))?;

    let shell = Ipv4Packet::builder()
        .tos(template.tos)
        .identification(template.identification)
        .reserved_flag(template.reserved_flag)
        .dont_fragment_flag(template.dont_fragment_flag)
        .more_fragment_flag(false)
        .fragment_offset(0)
        .ttl(template.ttl)
        .protocol(template.protocol.clone())
        .src_addr(template.src_addr)
        .dst_addr(template.dst_addr)
        .options(template.options.clone())
        .correct_length_at_build(true)
        .correct_checksum_at_build(true)
        .payload(Payload::Unknown(UnknownPacket::new(&buffer)))
        .build()?;

    // decode the whole datagram again so the payload becomes typed
    let mut wire = shell.header().to_bytes();
    wire.extend_from_slice(&buffer);
    Ipv4Packet::from_bytes(&wire, factories)
}

/// Reassemble a complete IPv6 fragment set into the original packet
///
/// Analogous to [`defragment`], keyed on the fragment extension header:
/// every packet in the set must carry one, and the reassembled packet has
/// the extension header removed with the fixed header's next-header field
/// pointing at the reassembled payload.
pub fn defragment_v6(fragments: &[Ipv6Packet], factories: &PacketFactories) -> Result<Ipv6Packet> {
    if fragments.is_empty() {
        return Err(Error::Fragmentation("no fragments to reassemble".into()));
    }

    struct Piece<'a> {
        packet: &'a Ipv6Packet,
        offset: usize,
        more: bool,
        data: Vec<u8>,
    }

    let mut key = None;
    let mut next_header = None;
    let mut pieces = Vec::with_capacity(fragments.len());
    for packet in fragments {
        let ext = packet
            .payload()
            .find_ipv6_fragment()
            .ok_or_else(|| {
                Error::Fragmentation("packet carries no fragment extension header".into())
            })?;
        key = Some(check_same_datagram(
            key,
            (
                IpAddr::V6(packet.header().src_addr),
                IpAddr::V6(packet.header().dst_addr),
                ext.header().identification,
            ),
        )?);
        next_header = Some(ext.header().next_header.clone());
        pieces.push(Piece {
            packet,
            offset: ext.header().fragment_byte_offset(),
            more: ext.header().more_fragment_flag,
            data: ext.payload().to_bytes(),
        });
    }

    let terminals: Vec<&Piece> = pieces.iter().filter(|p| !p.more).collect();
    if terminals.len() != 1 {
        return Err(Error::Fragmentation(format!(
            "need exactly one terminal fragment, got {}",
            terminals.len()
        )));
    }
    let total = terminals[0].offset + terminals[0].data.len();

    pieces.sort_by_key(|p| p.offset);

    let mut buffer = vec![0u8; total];
    for piece in &pieces {
        let end = (piece.offset + piece.data.len()).min(total);
        if piece.offset < end {
            buffer[piece.offset..end].copy_from_slice(&piece.data[..end - piece.offset]);
        }
    }

    let template = pieces[0].packet.header();
    let next_header =
        next_header.ok_or_else(|| Error::Fragmentation("no fragments to reassemble".into()))?;

    let shell = Ipv6Packet::builder()
        .traffic_class(template.traffic_class)
        .flow_label(template.flow_label)
        .next_header(next_header)
        .hop_limit(template.hop_limit)
        .src_addr(template.src_addr)
        .dst_addr(template.dst_addr)
        .correct_length_at_build(true)
        .payload(Payload::Unknown(UnknownPacket::new(&buffer)))
        .build()?;

    let mut wire = shell.header().to_bytes();
    wire.extend_from_slice(&buffer);
    Ipv6Packet::from_bytes(&wire, factories)
}

/// Identifies one datagram's fragment group
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    /// Source address
    pub src: IpAddr,
    /// Destination address
    pub dst: IpAddr,
    /// Identification field (IPv4: 16 bits, IPv6: 32 bits)
    pub identification: u32,
}

struct Group<P> {
    fragments: Vec<P>,
    terminal_seen: bool,
}

impl<P> Group<P> {
    fn new() -> Self {
        Self {
            fragments: Vec::new(),
            terminal_seen: false,
        }
    }
}

fn covers(mut ranges: Vec<(usize, usize)>, total: usize) -> bool {
    ranges.sort();
    let mut reached = 0usize;
    for (start, end) in ranges {
        if start > reached {
            return false;
        }
        reached = reached.max(end);
    }
    reached >= total
}

/// Stateful fragment collector
///
/// Groups incoming fragments by (source, destination, identification) and
/// reassembles a group as soon as its terminal fragment has arrived and
/// the collected ranges cover the whole datagram. Groups live only in
/// memory and are dropped once reassembled; nothing is persisted.
pub struct Defragmenter {
    factories: PacketFactories,
    v4_groups: HashMap<FragmentKey, Group<Ipv4Packet>>,
    v6_groups: HashMap<FragmentKey, Group<Ipv6Packet>>,
}

impl Defragmenter {
    /// A defragmenter decoding reassembled payloads through `factories`
    pub fn new(factories: PacketFactories) -> Self {
        Self {
            factories,
            v4_groups: HashMap::new(),
            v6_groups: HashMap::new(),
        }
    }

    /// Number of open (incomplete) groups
    pub fn pending(&self) -> usize {
        self.v4_groups.len() + self.v6_groups.len()
    }

    /// Feed one IPv4 packet
    ///
    /// A non-fragment passes straight through. A fragment is buffered;
    /// when its group completes, the reassembled packet is returned and
    /// the group is dropped.
    pub fn add(&mut self, packet: &Ipv4Packet) -> Result<Option<Ipv4Packet>> {
        if !packet.header().is_fragmented() {
            return Ok(Some(packet.clone()));
        }

        let key = FragmentKey {
            src: IpAddr::V4(packet.header().src_addr),
            dst: IpAddr::V4(packet.header().dst_addr),
            identification: packet.header().identification as u32,
        };

        let group = self.v4_groups.entry(key.clone()).or_insert_with(|| {
            debug!(?key, "opening IPv4 fragment group");
            Group::new()
        });
        if !packet.header().more_fragment_flag {
            group.terminal_seen = true;
        }
        group.fragments.push(packet.clone());

        if group.terminal_seen {
            let total = group
                .fragments
                .iter()
                .filter(|f| !f.header().more_fragment_flag)
                .map(|f| f.header().fragment_byte_offset() + f.payload().to_bytes().len())
                .max()
                .unwrap_or(0);
            let ranges = group
                .fragments
                .iter()
                .map(|f| {
                    let start = f.header().fragment_byte_offset();
                    (start, start + f.payload().to_bytes().len())
                })
                .collect();
            if covers(ranges, total) {
                let group = match self.v4_groups.remove(&key) {
                    Some(group) => group,
                    None => return Ok(None),
                };
                debug!(?key, fragments = group.fragments.len(), "group complete");
                return defragment(&group.fragments, &self.factories).map(Some);
            }
        }

        Ok(None)
    }

    /// Feed one IPv6 packet; the counterpart of [`add`](Self::add)
    pub fn add_v6(&mut self, packet: &Ipv6Packet) -> Result<Option<Ipv6Packet>> {
        let ext = match packet.payload().find_ipv6_fragment() {
            Some(ext) => ext,
            None => return Ok(Some(packet.clone())),
        };

        let key = FragmentKey {
            src: IpAddr::V6(packet.header().src_addr),
            dst: IpAddr::V6(packet.header().dst_addr),
            identification: ext.header().identification,
        };
        let more = ext.header().more_fragment_flag;
        let data_len = ext.payload().to_bytes().len();

        if data_len % 8 != 0 && more {
            warn!(?key, "non-terminal IPv6 fragment length not a multiple of 8");
        }

        let group = self.v6_groups.entry(key.clone()).or_insert_with(|| {
            debug!(?key, "opening IPv6 fragment group");
            Group::new()
        });
        if !more {
            group.terminal_seen = true;
        }
        group.fragments.push(packet.clone());

        if group.terminal_seen {
            let mut total = 0;
            let mut ranges = Vec::with_capacity(group.fragments.len());
            for fragment in &group.fragments {
                if let Some(ext) = fragment.payload().find_ipv6_fragment() {
                    let start = ext.header().fragment_byte_offset();
                    let end = start + ext.payload().to_bytes().len();
                    if !ext.header().more_fragment_flag {
                        total = total.max(end);
                    }
                    ranges.push((start, end));
                }
            }
            if covers(ranges, total) {
                let group = match self.v6_groups.remove(&key) {
                    Some(group) => group,
                    None => return Ok(None),
                };
                debug!(?key, fragments = group.fragments.len(), "group complete");
                return defragment_v6(&group.fragments, &self.factories).map(Some);
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_core::{IpNumber, Port};
    use lamina_packet::{Ipv4Builder, Ipv6Builder, Ipv6FragmentBuilder, UdpBuilder};
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn factories() -> PacketFactories {
        PacketFactories::statically_bound()
    }

    fn udp_datagram(payload_len: usize) -> Vec<u8> {
        UdpBuilder::new()
            .src_port(Port::of(4000))
            .dst_port(Port::of(5000))
            .payload(Payload::Unknown(UnknownPacket::new(
                &(0..payload_len).map(|i| i as u8).collect::<Vec<_>>(),
            )))
            .build()
            .unwrap()
            .to_bytes()
    }

    fn original(payload_len: usize) -> Ipv4Packet {
        let udp = udp_datagram(payload_len);
        let wire_payload = Payload::Unknown(UnknownPacket::new(&udp));
        let built = Ipv4Builder::new()
            .identification(0x99)
            .protocol(IpNumber::UDP)
            .src_addr(Ipv4Addr::new(10, 1, 0, 1))
            .dst_addr(Ipv4Addr::new(10, 1, 0, 2))
            .payload(wire_payload)
            .build()
            .unwrap();
        // run it through a decode so the payload is typed like a capture
        Ipv4Packet::from_bytes(&built.to_bytes(), &factories()).unwrap()
    }

    #[test]
    fn test_fragment_sizes_and_flags() {
        let packet = original(1000);
        let fragments: Vec<Ipv4Packet> = fragment(&packet, 256)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        // chunk = ((256 - 20) / 8) * 8 = 232; payload = 1008
        assert_eq!(fragments.len(), 1008usize.div_ceil(232));
        for (i, f) in fragments.iter().enumerate() {
            assert!(f.len() <= 256);
            let last = i == fragments.len() - 1;
            assert_eq!(f.header().more_fragment_flag, !last);
            assert_eq!(f.header().fragment_offset as usize, i * 232 / 8);
            assert_eq!(f.header().identification, 0x99);
        }
    }

    #[test]
    fn test_fragment_fits_returns_single() {
        let packet = original(100);
        let fragments: Vec<Ipv4Packet> = fragment(&packet, 1500)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0], packet);
    }

    #[test]
    fn test_fragment_mtu_too_small() {
        let packet = original(100);
        assert!(fragment(&packet, 27).is_err());
    }

    #[test]
    fn test_defragment_roundtrip_any_order() {
        let packet = original(1000);
        let mut fragments: Vec<Ipv4Packet> = fragment(&packet, 256)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        // deterministic shuffle: reverse and interleave
        fragments.reverse();
        if fragments.len() > 2 {
            let mid = fragments.len() / 2;
            fragments.swap(0, mid);
        }

        let reassembled = defragment(&fragments, &factories()).unwrap();
        assert_eq!(reassembled, packet);
        assert_eq!(reassembled.to_bytes(), packet.to_bytes());
    }

    #[test]
    fn test_defragment_duplicates_are_harmless() {
        let packet = original(500);
        let mut fragments: Vec<Ipv4Packet> = fragment(&packet, 128)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        fragments.push(fragments[1].clone());
        fragments.swap(0, 2);

        let reassembled = defragment(&fragments, &factories()).unwrap();
        assert_eq!(reassembled, packet);
    }

    #[test]
    fn test_defragment_requires_one_terminal() {
        let packet = original(500);
        let fragments: Vec<Ipv4Packet> = fragment(&packet, 128)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let no_terminal: Vec<Ipv4Packet> = fragments[..fragments.len() - 1].to_vec();
        assert!(defragment(&no_terminal, &factories()).is_err());
    }

    #[test]
    fn test_defragment_rejects_mixed_datagrams() {
        let a = original(500);
        let mut fragments: Vec<Ipv4Packet> = fragment(&a, 128)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let foreign = a
            .to_builder()
            .identification(0xdead)
            .build()
            .unwrap();
        fragments.push(foreign);
        assert!(defragment(&fragments, &factories()).is_err());
    }

    #[test]
    fn test_defragmenter_emits_on_completion() {
        let packet = original(1000);
        let mut fragments: Vec<Ipv4Packet> = fragment(&packet, 256)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        fragments.reverse();

        let mut defragmenter = Defragmenter::new(factories());
        let mut emitted = None;
        for fragment in &fragments {
            if let Some(done) = defragmenter.add(fragment).unwrap() {
                emitted = Some(done);
            }
        }
        assert_eq!(emitted.expect("reassembled packet"), packet);
        assert_eq!(defragmenter.pending(), 0);
    }

    #[test]
    fn test_defragmenter_passes_non_fragments_through() {
        let packet = original(100);
        let mut defragmenter = Defragmenter::new(factories());
        let out = defragmenter.add(&packet).unwrap();
        assert_eq!(out, Some(packet));
        assert_eq!(defragmenter.pending(), 0);
    }

    #[test]
    fn test_defragmenter_waits_for_gap_fill() {
        let packet = original(1000);
        let fragments: Vec<Ipv4Packet> = fragment(&packet, 256)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        let mut defragmenter = Defragmenter::new(factories());
        // terminal first, then all but one middle piece: must not emit
        assert!(defragmenter
            .add(fragments.last().unwrap())
            .unwrap()
            .is_none());
        for fragment in &fragments[2..fragments.len() - 1] {
            assert!(defragmenter.add(fragment).unwrap().is_none());
        }
        assert!(defragmenter.add(&fragments[0]).unwrap().is_none());
        assert_eq!(defragmenter.pending(), 1);

        // the missing piece completes the group
        let done = defragmenter.add(&fragments[1]).unwrap();
        assert_eq!(done, Some(packet));
    }

    fn v6_fragments(ids: u32, payload: &[u8], chunk: usize) -> Vec<Ipv6Packet> {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let mut fragments = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + chunk).min(payload.len());
            let packet = Ipv6Builder::new()
                .next_header(IpNumber::IPV6_FRAGMENT)
                .src_addr(src)
                .dst_addr(dst)
                .payload_builder(
                    Ipv6FragmentBuilder::new()
                        .next_header(IpNumber::UDP)
                        .fragment_offset((offset / 8) as u16)
                        .more_fragment_flag(end != payload.len())
                        .identification(ids)
                        .payload(Payload::Unknown(UnknownPacket::new(&payload[offset..end]))),
                )
                .build()
                .unwrap();
            // decode so the fragments look like captured packets
            fragments
                .push(Ipv6Packet::from_bytes(&packet.to_bytes(), &factories()).unwrap());
            offset = end;
        }
        fragments
    }

    #[test]
    fn test_defragment_v6_roundtrip() {
        let udp = udp_datagram(300);
        let mut fragments = v6_fragments(42, &udp, 96);
        fragments.reverse();

        let reassembled = defragment_v6(&fragments, &factories()).unwrap();
        assert_eq!(reassembled.header().next_header, IpNumber::UDP);
        assert!(reassembled.payload().find_udp().is_some());
        assert_eq!(reassembled.payload().to_bytes(), udp);
    }

    #[test]
    fn test_defragmenter_v6_emits_on_completion() {
        let udp = udp_datagram(300);
        let mut fragments = v6_fragments(43, &udp, 96);
        let last = fragments.len() - 1;
        fragments.swap(0, last);

        let mut defragmenter = Defragmenter::new(factories());
        let mut emitted = None;
        for fragment in &fragments {
            if let Some(done) = defragmenter.add_v6(fragment).unwrap() {
                emitted = Some(done);
            }
        }
        let reassembled = emitted.expect("reassembled packet");
        assert_eq!(reassembled.payload().to_bytes(), udp);
    }
}
