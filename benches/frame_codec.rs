use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio_util::codec::Decoder;

use hu_mesh::core::LogicalAddress;
use hu_mesh::protocol::frame::{self, FrameFlags, FrameHeader};
use hu_mesh::protocol::message::{MenuItem, Message, Multi, UiMenu};
use hu_mesh::protocol::payload;
use hu_mesh::protocol::profile::{split_profile, ProfileNode};
use hu_mesh::protocol::FrameCodec;

fn header(msg_type: u8) -> FrameHeader {
    let mut header = FrameHeader::direct(LogicalAddress::COORDINATOR, LogicalAddress(0x40), msg_type, 1234);
    header.flags = FrameFlags::NEED_ACK;
    header
}

fn bench_frames(c: &mut Criterion) {
    let body = vec![0x5Au8; 230];
    let encoded = frame::encode(&header(0x31), &body).unwrap();

    c.bench_function("frame_encode_max", |b| {
        b.iter(|| frame::encode(black_box(&header(0x31)), black_box(&body)).unwrap())
    });
    c.bench_function("frame_decode_max", |b| {
        b.iter(|| frame::decode(black_box(&encoded)).unwrap())
    });

    // a stream of 32 frames with a byte of noise in front of each
    let mut stream = BytesMut::new();
    for _ in 0..32 {
        stream.extend_from_slice(&[0x00]);
        stream.extend_from_slice(&encoded);
    }
    c.bench_function("codec_resync_stream", |b| {
        b.iter(|| {
            let mut codec = FrameCodec::new();
            let mut buf = stream.clone();
            let mut frames = 0;
            while let Ok(Some(_)) = codec.decode(&mut buf) {
                frames += 1;
            }
            black_box(frames)
        })
    });
}

fn bench_payloads(c: &mut Criterion) {
    let nodes: Vec<ProfileNode> = (0..17u16)
        .map(|i| ProfileNode { time_offset_ms: i * 500, ..ProfileNode::default() })
        .collect();
    let load = split_profile(1, &nodes).unwrap().remove(0);
    let profile = Message::ProfileLoad(load);
    let profile_bytes = payload::encode(&profile).unwrap();

    let menu = Message::UiMenu(UiMenu {
        list_id: 2,
        total_items: 30,
        start_index: 0,
        items: (0..8)
            .map(|i| MenuItem { item_id: i, icon_id: 0, flags: 0, text: format!("Recipe {}", i) })
            .collect(),
    });
    let multi = Message::Multi(Multi { base_id: 0, values: vec![-12; 114] });

    c.bench_function("payload_encode_profile_17", |b| {
        b.iter(|| payload::encode(black_box(&profile)).unwrap())
    });
    c.bench_function("payload_decode_profile_17", |b| {
        b.iter(|| payload::decode(0x15, black_box(&profile_bytes)).unwrap())
    });
    c.bench_function("payload_encode_menu_8", |b| {
        b.iter(|| payload::encode(black_box(&menu)).unwrap())
    });
    c.bench_function("payload_encode_multi_114", |b| {
        b.iter(|| payload::encode(black_box(&multi)).unwrap())
    });
}

criterion_group!(benches, bench_frames, bench_payloads);
criterion_main!(benches);
