//! BLOB payloads published over a local socket arrive as descriptors and are
//! rebuilt byte for byte by the receiving side.

mod common;

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use rust_indi::property::{
    BlobData, BlobMember, BlobValue, MemberValue, Members, PropertyVector, SharedBlob,
};
use rust_indi::transport::{recv_with_fds, ChannelKind, Connection};
use rust_indi::wire::{apply_snoop, Element, MessageDecoder, SnoopOutcome};
use rust_indi::DriverIo;

use common::{small_io, stream_driver};

fn camera() -> PropertyVector {
    PropertyVector::builder("Camera", "CCD1")
        .build(Members::Blob(vec![BlobMember::new("IMAGE", "Image").unwrap()]))
        .unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn with_payload(data: BlobData) -> PropertyVector {
    let mut v = camera();
    let value = BlobValue::new(".raw", data).unwrap();
    v.update(&["IMAGE"], &[MemberValue::Blob(value)]).unwrap();
    v
}

/// Read from the hub end until one complete message is decoded.
fn receive(hub: &UnixStream, decoder: &mut MessageDecoder) -> Element {
    let mut buf = vec![0u8; 4096];
    loop {
        if let Some(msg) = decoder.next_message().unwrap() {
            return msg;
        }
        let (n, fds) = recv_with_fds(hub, &mut buf, 16).unwrap();
        assert!(n > 0 || !fds.is_empty(), "driver side closed early");
        decoder.push_fds(fds);
        decoder.push_bytes(&buf[..n]);
    }
}

fn received_payload(root: &Element) -> Vec<u8> {
    let mut shadow = camera();
    assert_eq!(apply_snoop(root, &mut shadow).unwrap(), SnoopOutcome::Updated);
    shadow
        .blob("IMAGE")
        .unwrap()
        .value()
        .data
        .as_ref()
        .map(|d| d.as_slice().to_vec())
        .unwrap_or_default()
}

#[test]
fn payloads_of_every_boundary_size_arrive_intact() {
    let io_config = small_io();
    // 0, 1, one chunk, one chunk plus one, beyond the flush threshold.
    let sizes = [
        0,
        1,
        io_config.chunk_size,
        io_config.chunk_size + 1,
        io_config.flush_threshold * 4 + 3,
    ];

    let (driver_end, hub) = UnixStream::pair().unwrap();
    let conn = Connection::from_socket(driver_end, &io_config);
    assert_eq!(conn.kind(), ChannelKind::Socket);
    let io = DriverIo::new(conn).with_fatal_exit(false);
    let mut decoder = MessageDecoder::new();

    for size in sizes {
        let original = pattern(size);
        io.publish(&with_payload(BlobData::from(original.clone())), None).unwrap();

        let root = receive(&hub, &mut decoder);
        assert_eq!(root.name, "setBLOBVector");
        let blob = root.children_named("oneBLOB").next().unwrap();
        if size == 0 {
            assert_eq!(blob.attr("size"), Some("0"));
            assert!(blob.attachment.is_none());
        } else {
            assert_eq!(blob.attr("attached"), Some("true"));
            assert_eq!(blob.attr("len"), Some(size.to_string().as_str()));
        }
        assert_eq!(received_payload(&root), original, "size {size}");
    }
}

#[test]
fn shared_memory_payload_is_sent_without_copy() {
    let original = pattern(10_000);
    let shared = Arc::new(SharedBlob::from_bytes(&original).unwrap());

    let (driver_end, hub) = UnixStream::pair().unwrap();
    let io = DriverIo::new(Connection::from_socket(driver_end, &small_io())).with_fatal_exit(false);
    io.publish(&with_payload(BlobData::Shared(shared)), None).unwrap();

    let mut decoder = MessageDecoder::new();
    let root = receive(&hub, &mut decoder);
    assert_eq!(received_payload(&root), original);
}

#[test]
fn several_attachments_keep_their_order() {
    let members = (0..3)
        .map(|i| BlobMember::new(format!("B{i}"), "").unwrap())
        .collect();
    let mut v = PropertyVector::builder("Camera", "FRAMES")
        .build(Members::Blob(members))
        .unwrap();
    let payloads: Vec<Vec<u8>> = (0..3).map(|i| vec![b'a' + i as u8; 100 + i]).collect();
    let values: Vec<MemberValue> = payloads
        .iter()
        .map(|p| MemberValue::Blob(BlobValue::new(".bin", p.clone().into()).unwrap()))
        .collect();
    v.update(&["B0", "B1", "B2"], &values).unwrap();

    let (driver_end, hub) = UnixStream::pair().unwrap();
    let io = DriverIo::new(Connection::from_socket(driver_end, &small_io())).with_fatal_exit(false);
    io.publish(&v, None).unwrap();

    let mut decoder = MessageDecoder::new();
    let root = receive(&hub, &mut decoder);
    let got: Vec<Vec<u8>> = root
        .children_named("oneBLOB")
        .map(|c| c.attachment.as_ref().unwrap().as_slice().to_vec())
        .collect();
    assert_eq!(got, payloads);
}

#[test]
fn stream_channel_inlines_base64() {
    let (io, out) = stream_driver();
    let original = pattern(1000);
    io.publish(&with_payload(original.clone().into()), None).unwrap();

    let text = out.text();
    assert!(text.contains("enclen='1336'"));
    assert!(!text.contains("attached="));
    assert!(text.lines().all(|l| l.len() <= 120));

    let mut decoder = MessageDecoder::new();
    decoder.push_bytes(text.as_bytes());
    let root = decoder.next_message().unwrap().unwrap();
    assert_eq!(received_payload(&root), original);
}
