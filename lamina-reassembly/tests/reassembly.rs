//! End-to-end fragmentation and stream reassembly scenarios

use std::net::{IpAddr, Ipv4Addr};

use lamina_core::{IpNumber, Port};
use lamina_packet::{
    Codec, IcmpV4Builder, IcmpV4EchoBuilder, Ipv4Builder, Ipv4Packet, PacketFactories, Payload,
    TcpBuilder, UnknownPacket,
};
use lamina_reassembly::{
    defragment, fragment, StreamAssembler, StreamDirection, TcpSessionKey,
};

fn factories() -> PacketFactories {
    PacketFactories::statically_bound()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A 4000-byte ICMP echo inside IPv4, decoded once so the chain is typed
/// the way a capture would be
fn ping_packet() -> Ipv4Packet {
    let echo_data: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
    let built = Ipv4Builder::new()
        .identification(0x0d0d)
        .protocol(IpNumber::ICMPV4)
        .src_addr(Ipv4Addr::new(192, 0, 2, 1))
        .dst_addr(Ipv4Addr::new(192, 0, 2, 99))
        .payload_builder(
            IcmpV4Builder::new().payload_builder(
                IcmpV4EchoBuilder::new()
                    .identifier(77)
                    .sequence_number(1)
                    .payload(Payload::Unknown(UnknownPacket::new(&echo_data))),
            ),
        )
        .build()
        .unwrap();
    Ipv4Packet::from_bytes(&built.to_bytes(), &factories()).unwrap()
}

#[test]
fn ping_fragments_at_mtu_987() {
    let packet = ping_packet();
    // ICMP message: 4 (common) + 4 (echo) + 4000 (data) = 4008 bytes
    assert_eq!(packet.len(), 20 + 4008);

    let fragments: Vec<Ipv4Packet> = fragment(&packet, 987)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    // 960 payload bytes fit beside the 20-byte header under 987
    let chunk = ((987 - 20) / 8) * 8;
    assert_eq!(fragments.len(), 4008usize.div_ceil(chunk));
    assert_eq!(fragments.len(), 5);

    let mut expected_offset = 0u16;
    for (i, fragment) in fragments.iter().enumerate() {
        assert!(fragment.len() <= 987);
        let last = i == fragments.len() - 1;
        assert_eq!(fragment.header().more_fragment_flag, !last);
        assert_eq!(fragment.header().fragment_offset, expected_offset);
        expected_offset += ((fragment.len() - 20) / 8) as u16;
    }
}

#[test]
fn defragment_is_order_insensitive() {
    init_tracing();
    let packet = ping_packet();

    for mtu in [576, 987, 1500] {
        let mut fragments: Vec<Ipv4Packet> = fragment(&packet, mtu)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        // deterministic shuffle
        fragments.reverse();
        let mid = fragments.len() / 2;
        fragments.swap(0, mid);

        let reassembled = defragment(&fragments, &factories()).unwrap();
        assert_eq!(reassembled, packet, "mtu {}", mtu);
        assert_eq!(reassembled.to_bytes(), packet.to_bytes());

        // the echo comes back typed after reassembly
        let echo = reassembled
            .payload()
            .find_icmpv4_echo()
            .expect("typed echo after reassembly");
        assert_eq!(echo.header().identifier, 77);
    }
}

#[test]
fn fragments_decode_back_through_the_codec() {
    let packet = ping_packet();
    let fragments: Vec<Ipv4Packet> = fragment(&packet, 576)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    // every fragment survives a wire round trip on its own
    let codec = Codec::with_defaults();
    let rewired: Vec<Ipv4Packet> = fragments
        .iter()
        .map(|f| {
            let decoded = codec.decode(&f.to_bytes(), lamina_core::DataLinkType::RAW);
            decoded.find_ipv4().expect("ipv4 fragment").clone()
        })
        .collect();

    let reassembled = defragment(&rewired, &factories()).unwrap();
    assert_eq!(reassembled, packet);
}

#[test]
fn stream_reassembly_matches_unfragmented_decode() {
    // two application "PDUs" split across out-of-order TCP segments
    let pdu_a = b"first message ".to_vec();
    let pdu_b = b"and the second".to_vec();
    let mut full = pdu_a.clone();
    full.extend_from_slice(&pdu_b);

    let client = Ipv4Addr::new(198, 51, 100, 1);
    let server = Ipv4Addr::new(198, 51, 100, 2);

    let seg = |seq: u32, syn: bool, fin: bool, data: &[u8]| -> Payload {
        let mut tcp = TcpBuilder::new()
            .src_port(Port::of(40000))
            .dst_port(Port::of(9000))
            .sequence_number(seq)
            .syn(syn)
            .ack(!syn)
            .fin(fin)
            .src_addr(IpAddr::V4(client))
            .dst_addr(IpAddr::V4(server))
            .correct_checksum_at_build(true);
        if !data.is_empty() {
            tcp = tcp.payload(Payload::Unknown(UnknownPacket::new(data)));
        }
        Payload::Ipv4(Box::new(
            Ipv4Builder::new()
                .src_addr(client)
                .dst_addr(server)
                .protocol(IpNumber::TCP)
                .payload_builder(tcp)
                .build()
                .unwrap(),
        ))
    };

    let isn = 0xfff0; // crosses nothing, but distinct from zero
    let mut delivered: Vec<(StreamDirection, Vec<u8>)> = Vec::new();
    {
        let mut assembler = StreamAssembler::new(
            |_key: &TcpSessionKey, direction: StreamDirection, data: &Payload| {
                delivered.push((direction, data.to_bytes()));
            },
        );

        // SYN first, FIN last, data scrambled in between
        assert!(assembler.add(&seg(isn, true, false, b"")));
        assert!(assembler.add(&seg(isn + 1 + 14, false, false, &full[14..20])));
        assert!(assembler.add(&seg(isn + 1, false, false, &full[..14])));
        assert!(assembler.add(&seg(isn + 1 + 20, false, false, &full[20..])));
        assert!(assembler.add(&seg(isn + 1 + full.len() as u32, false, true, b"")));
    }

    // with no application decoder bound, the stream arrives as one unknown
    // unit whose bytes equal the in-order concatenation
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, StreamDirection::ClientToServer);
    assert_eq!(delivered[0].1, full);

    // decoding those bytes matches decoding the unfragmented payload
    let from_stream = factories()
        .port()
        .new_packet(&delivered[0].1, &factories(), &[Port::of(9000)]);
    let from_capture = factories()
        .port()
        .new_packet(&full, &factories(), &[Port::of(9000)]);
    assert_eq!(from_stream, from_capture);
}
