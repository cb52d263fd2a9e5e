mod common;

use common::{frame_schema, parse_all, parser, random_frame, write_all};
use swe_common::{
    BinaryBlock, BinaryComponent, BinaryEncoding, ByteEncoding, ByteOrder, Cipher, Component,
    DataBlock, DataType, Error, ErrorKind, PhysicalType, StreamState, TransformRegistry,
};

#[derive(Debug)]
struct Xor(u8);

impl Cipher for Xor {
    fn id(&self) -> &str {
        "xor"
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(data.iter().map(|b| b ^ self.0).collect())
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.encrypt(data)
    }
}

fn frame_encoding(order: ByteOrder, byte_encoding: ByteEncoding) -> BinaryEncoding {
    BinaryEncoding::new(order, byte_encoding)
        .with_member(BinaryComponent::new("n", PhysicalType::U16))
        .with_member(BinaryComponent::new("label", PhysicalType::Utf8))
        .with_member(BinaryComponent::new("tracks/track/ok", PhysicalType::Bool).with_bit_length(1))
        .with_member(
            BinaryComponent::new("tracks/track/k", PhysicalType::U8)
                .with_bit_length(4)
                .with_padding(3, 0),
        )
        .with_member(BinaryComponent::new("window/w", PhysicalType::I16))
        .with_member(BinaryComponent::new("events/event/note", PhysicalType::Ascii).with_byte_length(8))
}

fn frames(n: usize, seed: u64) -> (Component, Vec<DataBlock>) {
    let schema = frame_schema();
    let mut rng = fastrand::Rng::with_seed(seed);
    let blocks = (0..n).map(|_| random_frame(&schema, &mut rng)).collect();
    (schema, blocks)
}

#[test]
fn test_packed_round_trip() {
    let (schema, blocks) = frames(40, 11);
    for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
        let encoding = frame_encoding(order, ByteEncoding::Raw);
        let bytes = write_all(&schema, encoding.clone(), TransformRegistry::default(), &blocks);
        let parsed = parse_all(&schema, encoding, TransformRegistry::default(), bytes);
        assert_eq!(parsed, blocks);
    }
}

#[test]
fn test_natural_types_layout() {
    let schema = Component::record("r")
        .with_field(Component::scalar("a", DataType::U32))
        .and_then(|r| r.with_field(Component::scalar("b", DataType::F32)))
        .and_then(|r| r.with_field(Component::scalar("s", DataType::Ascii)))
        .unwrap();
    let mut block = schema.create_block();
    block.set_int(0, 0x0102_0304).unwrap();
    block.set_double(1, 1.0).unwrap();
    block.set_string(2, "hi").unwrap();
    let big = write_all(
        &schema,
        BinaryEncoding::new(ByteOrder::BigEndian, ByteEncoding::Raw),
        TransformRegistry::default(),
        std::slice::from_ref(&block),
    );
    assert_eq!(big, [1, 2, 3, 4, 0x3f, 0x80, 0, 0, 0, 2, b'h', b'i']);
    let little = write_all(
        &schema,
        BinaryEncoding::new(ByteOrder::LittleEndian, ByteEncoding::Raw),
        TransformRegistry::default(),
        std::slice::from_ref(&block),
    );
    assert_eq!(little, [4, 3, 2, 1, 0, 0, 0x80, 0x3f, 2, 0, b'h', b'i']);
}

#[test]
fn test_compressed_and_encrypted_block() {
    let (schema, blocks) = frames(25, 3);
    let mut transforms = TransformRegistry::default();
    transforms.register_cipher(Xor(0x5a));
    let encoding = frame_encoding(ByteOrder::LittleEndian, ByteEncoding::Raw).with_member(
        BinaryBlock::new("tracks")
            .with_compression("zlib")
            .with_encryption("xor"),
    );
    let bytes = write_all(&schema, encoding.clone(), transforms.clone(), &blocks);
    let parsed = parse_all(&schema, encoding, transforms, bytes);
    assert_eq!(parsed, blocks);
}

#[test]
fn test_unknown_cipher_rejected_at_configuration() {
    let schema = frame_schema();
    let encoding = frame_encoding(ByteOrder::BigEndian, ByteEncoding::Raw)
        .with_member(BinaryBlock::new("tracks").with_encryption("xor"));
    let mut parser = swe_common::DataStreamParser::new();
    parser.set_data_components(schema).unwrap();
    let err = parser.set_data_encoding(encoding).unwrap_err();
    assert!(matches!(err, Error::InvalidEncoding(_)));
    assert_eq!(parser.state(), StreamState::Unconfigured);
}

#[test]
fn test_fixed_length_block() {
    let schema = Component::record("r")
        .with_field(Component::scalar("a", DataType::U32))
        .and_then(|r| r.with_field(Component::scalar("b", DataType::U32)))
        .unwrap();
    let mut encoding = BinaryEncoding::new(ByteOrder::BigEndian, ByteEncoding::Raw);
    let mut framing = BinaryBlock::new("a");
    framing.byte_length = Some(6);
    framing.padding_before = 1;
    framing.padding_after = 2;
    encoding = encoding.with_member(framing);
    let mut block = schema.create_block();
    block.set_int(0, 9).unwrap();
    block.set_int(1, 10).unwrap();
    let bytes = write_all(
        &schema,
        encoding.clone(),
        TransformRegistry::default(),
        std::slice::from_ref(&block),
    );
    assert_eq!(bytes, [0, 0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0, 10]);
    let parsed = parse_all(&schema, encoding, TransformRegistry::default(), bytes);
    assert_eq!(parsed, vec![block]);
}

#[test]
fn test_base64_stream() {
    let (schema, blocks) = frames(10, 5);
    let encoding = frame_encoding(ByteOrder::BigEndian, ByteEncoding::Base64);
    let bytes = write_all(&schema, encoding.clone(), TransformRegistry::default(), &blocks);
    assert!(
        bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
    );
    let parsed = parse_all(&schema, encoding, TransformRegistry::default(), bytes);
    assert_eq!(parsed, blocks);
}

#[test]
fn test_conversion_error_skips_one_record() {
    let schema = Component::record("r")
        .with_field(Component::scalar("a", DataType::U32))
        .and_then(|r| r.with_field(Component::scalar("b", DataType::U32)))
        .unwrap();
    let encoding = BinaryEncoding::new(ByteOrder::BigEndian, ByteEncoding::Raw)
        .with_member(BinaryComponent::new("a", PhysicalType::I8));
    let bytes = vec![0xff, 0, 0, 0, 1, 0x05, 0, 0, 0, 2];
    let mut parser = parser(&schema, encoding, TransformRegistry::default(), bytes);
    let err = parser.parse_next_element().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BinaryFormat);
    assert_eq!(err.path(), Some("a"));
    let block = parser.parse_next_element().unwrap().unwrap();
    assert_eq!(block.get_int(0).unwrap(), 5);
    assert_eq!(block.get_int(1).unwrap(), 2);
    assert!(parser.parse_next_element().unwrap().is_none());
}

#[test]
fn test_truncated_stream_fails() {
    let (schema, blocks) = frames(3, 9);
    let encoding = frame_encoding(ByteOrder::BigEndian, ByteEncoding::Raw);
    let mut bytes = write_all(&schema, encoding.clone(), TransformRegistry::default(), &blocks);
    bytes.truncate(bytes.len() - 1);
    let mut parser = parser(&schema, encoding, TransformRegistry::default(), bytes);
    assert!(parser.parse_next_element().unwrap().is_some());
    assert!(parser.parse_next_element().unwrap().is_some());
    let err = parser.parse_next_element().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BinaryFormat);
    assert_eq!(parser.state(), StreamState::Failed);
    assert!(matches!(
        parser.parse_next_element(),
        Err(Error::InvalidState { .. })
    ));
    parser.reset().unwrap();
    assert_eq!(parser.state(), StreamState::Configured);
}

#[test]
fn test_unaligned_fixed_string_and_wide_padding() {
    let schema = Component::record("r")
        .with_field(Component::scalar("a", DataType::U32))
        .and_then(|r| r.with_field(Component::scalar("s", DataType::Ascii)))
        .and_then(|r| r.with_field(Component::scalar("c", DataType::U8)))
        .unwrap();
    let encoding = BinaryEncoding::new(ByteOrder::BigEndian, ByteEncoding::Raw)
        .with_member(BinaryComponent::new("a", PhysicalType::U32).with_bit_length(3))
        .with_member(BinaryComponent::new("s", PhysicalType::Ascii).with_byte_length(16))
        .with_member(BinaryComponent::new("c", PhysicalType::U8).with_padding(70, 70));
    let mut block = schema.create_block();
    block.set_int(0, 5).unwrap();
    block.set_string(1, "ab").unwrap();
    block.set_int(2, 0xc3).unwrap();
    let bytes = write_all(
        &schema,
        encoding.clone(),
        TransformRegistry::default(),
        std::slice::from_ref(&block),
    );
    // 3 + 128 + 70 + 8 + 70 bits
    assert_eq!(bytes.len(), 35);
    assert_eq!(bytes[0], 0b1010_1100);
    let parsed = parse_all(&schema, encoding, TransformRegistry::default(), bytes);
    assert_eq!(parsed, vec![block]);
}

#[test]
fn test_oversized_block_length_is_truncation() {
    let schema = Component::record("r")
        .with_field(Component::scalar("a", DataType::U32))
        .and_then(|r| r.with_field(Component::scalar("b", DataType::U32)))
        .unwrap();
    let encoding = BinaryEncoding::new(ByteOrder::BigEndian, ByteEncoding::Raw)
        .with_member(BinaryBlock::new("a").with_compression("zlib"));
    let bytes = vec![0x0f, 0xff, 0xff, 0xff, 1, 2, 3];
    let mut parser = parser(&schema, encoding, TransformRegistry::default(), bytes);
    let err = parser.parse_next_element().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BinaryFormat);
    assert_eq!(parser.state(), StreamState::Failed);
}
