// tests/property/codec_test.rs

//! The decoder must yield the same lines however the byte stream is split.

use bytes::BytesMut;
use cmmd::core::protocol::LineCodec;
use proptest::prelude::*;
use tokio_util::codec::Decoder;

fn decode_in_chunks(input: &[u8], cuts: &[usize]) -> Vec<String> {
    let mut codec = LineCodec::new(1024);
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    let mut start = 0;
    let mut boundaries: Vec<usize> = cuts.iter().map(|c| c % (input.len() + 1)).collect();
    boundaries.push(input.len());
    boundaries.sort_unstable();
    for end in boundaries {
        if end < start {
            continue;
        }
        buf.extend_from_slice(&input[start..end]);
        start = end;
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            out.push(line);
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_segmentation_does_not_change_lines(
        lines in proptest::collection::vec("[ -~]{0,60}", 0..12),
        cuts in proptest::collection::vec(any::<usize>(), 0..20),
    ) {
        let mut input = Vec::new();
        for line in &lines {
            input.extend_from_slice(line.as_bytes());
            input.push(b'\n');
        }

        let whole = decode_in_chunks(&input, &[]);
        let split = decode_in_chunks(&input, &cuts);
        let expected: Vec<String> = lines.iter().map(|l| l.trim().to_string()).collect();
        prop_assert_eq!(&whole, &expected);
        prop_assert_eq!(&split, &expected);
    }

    #[test]
    fn test_arbitrary_bytes_never_panic(
        bytes in proptest::collection::vec(any::<u8>(), 0..2048),
    ) {
        let mut codec = LineCodec::new(256);
        let mut buf = BytesMut::from(&bytes[..]);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(line)) => prop_assert!(!line.contains('\n')),
                Ok(None) | Err(_) => break,
            }
        }
    }
}
