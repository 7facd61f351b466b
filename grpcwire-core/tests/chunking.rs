//! Property tests for frame reassembly under arbitrary chunking.

use bytes::Bytes;
use grpcwire_core::{BoxedCodec, CompressionRegistry, FrameDecoder, GrpcMessage, encode_frame};
use proptest::prelude::*;

fn the_values() -> Vec<Vec<u8>> {
    (0..10)
        .map(|i| format!("the-value-{i}").into_bytes())
        .collect()
}

fn concat_frames(payloads: &[Vec<u8>], codec: &BoxedCodec) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|p| {
            GrpcMessage::new(Bytes::copy_from_slice(p))
                .encode(codec)
                .expect("encode")
                .to_vec()
        })
        .collect()
}

/// Feed `wire` split at the given ascending cut points, checking that no
/// partial frame is emitted and collecting every decoded payload.
fn decode_split(wire: &[u8], cuts: &[usize], codec: Option<BoxedCodec>) -> Vec<Vec<u8>> {
    let mut decoder = FrameDecoder::new(codec);
    let mut out = Vec::new();
    let mut start = 0;
    for &end in cuts.iter().chain(std::iter::once(&wire.len())) {
        for message in decoder.decode(&wire[start..end]).expect("decode") {
            out.push(message.payload().expect("payload").to_vec());
        }
        start = end;
    }
    decoder.finish().expect("no trailing partial frame");
    out
}

#[test]
fn the_values_survive_every_single_split_point() {
    let payloads = the_values();
    let wire = concat_frames(&payloads, &BoxedCodec::identity());
    for cut in 0..=wire.len() {
        assert_eq!(decode_split(&wire, &[cut], None), payloads, "split at {cut}");
    }
}

#[test]
fn the_values_survive_byte_at_a_time_delivery() {
    let payloads = the_values();
    let wire = concat_frames(&payloads, &BoxedCodec::identity());
    let cuts: Vec<usize> = (1..wire.len()).collect();
    assert_eq!(decode_split(&wire, &cuts, None), payloads);
}

#[test]
fn the_values_survive_every_split_with_gzip() {
    let registry = CompressionRegistry::default();
    let Ok(gzip) = registry.resolve("gzip") else {
        return;
    };
    let payloads = the_values();
    let wire = concat_frames(&payloads, &gzip);
    for cut in 0..=wire.len() {
        assert_eq!(
            decode_split(&wire, &[cut], Some(gzip.clone())),
            payloads,
            "split at {cut}"
        );
    }
}

prop_compose! {
    fn split_frames()
        (payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..12))
        (cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16), payloads in Just(payloads))
        -> (Vec<Vec<u8>>, Vec<prop::sample::Index>)
    {
        (payloads, cuts)
    }
}

proptest! {
    #[test]
    fn arbitrary_chunking_yields_frames_in_order((payloads, cuts) in split_frames()) {
        let wire = concat_frames(&payloads, &BoxedCodec::identity());
        let mut cuts: Vec<usize> = cuts.iter().map(|i| i.index(wire.len() + 1)).collect();
        cuts.sort_unstable();
        prop_assert_eq!(decode_split(&wire, &cuts, None), payloads);
    }

    #[test]
    fn round_trip_through_every_registered_encoding(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let registry = CompressionRegistry::default();
        for name in registry.names() {
            let codec = registry.resolve(name).unwrap();
            let frame = GrpcMessage::new(payload.clone()).encode(&codec).unwrap();
            prop_assert_eq!(frame[0] == 1, !codec.is_identity());

            let decoded = decode_split(&frame, &[], Some(codec.clone()));
            prop_assert_eq!(decoded, vec![payload.clone()]);
        }
    }
}

#[test]
fn encode_frame_matches_message_encoding() {
    let frame = encode_frame(b"the-value-3", false);
    let via_message = GrpcMessage::from("the-value-3")
        .encode(&BoxedCodec::identity())
        .unwrap();
    assert_eq!(frame, via_message);
}
