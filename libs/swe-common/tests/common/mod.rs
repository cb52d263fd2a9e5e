#![allow(dead_code)]

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use swe_common::{
    Component, DataBlock, DataEncoding, DataPath, DataStreamParser, DataStreamWriter, DataType,
    ElementCount, StreamState, TransformRegistry, Value,
};

/// Shared output buffer, readable while a writer owns a clone.
#[derive(Clone, Default)]
pub struct Sink(Arc<Mutex<Vec<u8>>>);

impl Sink {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn path(schema: &Component, p: &str) -> DataPath {
    schema.data_path(p).unwrap()
}

pub fn set(block: &mut DataBlock, schema: &Component, p: &str, value: impl Into<Value>) {
    block
        .set_value_at(schema, &path(schema, p), value.into())
        .unwrap();
}

/// Writes every block and returns the produced bytes.
pub fn write_all(
    schema: &Component,
    encoding: impl Into<DataEncoding>,
    transforms: TransformRegistry,
    blocks: &[DataBlock],
) -> Vec<u8> {
    let sink = Sink::default();
    let mut writer = DataStreamWriter::new();
    writer
        .set_transforms(transforms)
        .unwrap()
        .set_data_components(schema.clone())
        .unwrap()
        .set_data_encoding(encoding)
        .unwrap()
        .set_output(sink.clone())
        .unwrap();
    for block in blocks {
        writer.write(block).unwrap();
    }
    assert_eq!(writer.records_written(), blocks.len() as u64);
    writer.close().unwrap();
    sink.bytes()
}

pub fn parser(
    schema: &Component,
    encoding: impl Into<DataEncoding>,
    transforms: TransformRegistry,
    bytes: Vec<u8>,
) -> DataStreamParser {
    let mut parser = DataStreamParser::new();
    parser
        .set_transforms(transforms)
        .unwrap()
        .set_data_components(schema.clone())
        .unwrap()
        .set_data_encoding(encoding)
        .unwrap()
        .set_input(std::io::Cursor::new(bytes))
        .unwrap();
    parser
}

pub fn parse_all(
    schema: &Component,
    encoding: impl Into<DataEncoding>,
    transforms: TransformRegistry,
    bytes: Vec<u8>,
) -> Vec<DataBlock> {
    let mut parser = parser(schema, encoding, transforms, bytes);
    let blocks = std::iter::from_fn(|| parser.parse_next_element().unwrap()).collect();
    assert_eq!(parser.state(), StreamState::Exhausted);
    blocks
}

/// `frame { time, label, n, tracks[n] { id, ok, pos[3], k, hits[k] { x, y } }, window[2], events* }`
pub fn frame_schema() -> Component {
    let hit = Component::record("hit")
        .with_field(Component::scalar("x", DataType::F64))
        .and_then(|r| r.with_field(Component::scalar("y", DataType::F64)))
        .unwrap();
    let track = Component::record("track")
        .with_field(Component::scalar("id", DataType::I64))
        .and_then(|r| r.with_field(Component::scalar("ok", DataType::Bool)))
        .and_then(|r| {
            r.with_field(Component::array(
                "pos",
                Component::scalar("p", DataType::F32),
                ElementCount::Fixed(3),
            ))
        })
        .and_then(|r| r.with_field(Component::scalar("k", DataType::I32)))
        .and_then(|r| r.with_field(Component::array("hits", hit, ElementCount::Ref("k".into()))))
        .unwrap();
    let event = Component::record("event")
        .with_field(Component::scalar("code", DataType::U32))
        .and_then(|r| r.with_field(Component::scalar("note", DataType::Ascii)))
        .unwrap();
    Component::record("frame")
        .with_field(Component::scalar("time", DataType::F64))
        .and_then(|r| r.with_field(Component::scalar("label", DataType::Utf8)))
        .and_then(|r| r.with_field(Component::scalar("n", DataType::U32)))
        .and_then(|r| r.with_field(Component::array("tracks", track, ElementCount::Ref("n".into()))))
        .and_then(|r| {
            r.with_field(Component::array(
                "window",
                Component::range("w", DataType::I32),
                ElementCount::Fixed(2),
            ))
        })
        .and_then(|r| r.with_field(Component::list("events", event)))
        .unwrap()
}

pub fn random_frame(schema: &Component, rng: &mut fastrand::Rng) -> DataBlock {
    let mut block = schema.create_block();
    set(&mut block, schema, "time", rng.f64() * 1e9);
    let label: String = (0..rng.usize(1..12)).map(|_| rng.alphanumeric()).collect();
    set(&mut block, schema, "label", Value::Utf8(label));
    let tracks = rng.usize(0..4);
    block
        .update_size(schema, &path(schema, "tracks"), tracks)
        .unwrap();
    for t in 0..tracks {
        set(&mut block, schema, &format!("tracks/{t}/id"), rng.i64(..));
        set(&mut block, schema, &format!("tracks/{t}/ok"), rng.bool());
        for p in 0..3 {
            set(&mut block, schema, &format!("tracks/{t}/pos/{p}"), rng.f32() - 0.5);
        }
        let hits = rng.usize(0..5);
        block
            .update_size(schema, &path(schema, &format!("tracks/{t}/hits")), hits)
            .unwrap();
        for h in 0..hits {
            set(&mut block, schema, &format!("tracks/{t}/hits/{h}/x"), rng.f64());
            set(&mut block, schema, &format!("tracks/{t}/hits/{h}/y"), -rng.f64());
        }
    }
    let w = block.atom_index(schema, &path(schema, "window")).unwrap();
    for i in 0..4 {
        block.set_int(w + i, rng.i32(-1000..1000) as i64).unwrap();
    }
    let events = path(schema, "events");
    let event = schema.fields()[5].element().unwrap();
    for _ in 0..rng.usize(0..3) {
        let mut entry = event.create_block();
        entry.set_int(0, rng.u32(..) as i64).unwrap();
        let note: String = (0..rng.usize(1..8)).map(|_| rng.alphanumeric()).collect();
        entry.set_string(1, note).unwrap();
        block.append(schema, &events, entry).unwrap();
    }
    block
}
