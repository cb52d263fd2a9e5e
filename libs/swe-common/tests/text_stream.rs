mod common;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

use common::{frame_schema, parse_all, random_frame, write_all};
use swe_common::{
    Component, DataBlock, DataStreamParser, DataType, ElementCount, StreamState, TextEncoding,
    TransformRegistry,
};

#[test]
fn test_custom_separators_round_trip() {
    let schema = Component::record("series")
        .with_field(Component::scalar("time", DataType::F64))
        .and_then(|r| {
            r.with_field(Component::array(
                "values",
                Component::scalar("v", DataType::F64),
                ElementCount::Fixed(5),
            ))
        })
        .unwrap();
    let encoding = TextEncoding::new("!", "@@\n");
    let mut text = String::new();
    for r in 0..5 {
        let tokens: Vec<String> = (0..6)
            .map(|i| format!("{:?}", r as f64 * 10.0 + i as f64 * 0.25))
            .collect();
        text.push_str(&tokens.join("!"));
        text.push_str("@@\n");
    }

    let blocks = parse_all(
        &schema,
        encoding.clone(),
        TransformRegistry::default(),
        text.clone().into_bytes(),
    );
    assert_eq!(blocks.len(), 5);
    for (r, block) in blocks.iter().enumerate() {
        assert_eq!(block.atom_count(), 6);
        assert_eq!(block.get_double(0).unwrap(), r as f64 * 10.0);
        assert_eq!(block.get_double(5).unwrap(), r as f64 * 10.0 + 1.25);
    }
    let out = write_all(&schema, encoding, TransformRegistry::default(), &blocks);
    assert_eq!(String::from_utf8(out).unwrap(), text);
}

#[test]
fn test_nested_round_trip() {
    let schema = frame_schema();
    schema.validate().unwrap();
    let mut rng = fastrand::Rng::with_seed(7);
    let blocks: Vec<DataBlock> = (0..50).map(|_| random_frame(&schema, &mut rng)).collect();
    for encoding in [
        TextEncoding::new(",", "\n"),
        TextEncoding::new(" ", "\n"),
        TextEncoding::new(";", "|").with_decimal_separator(','),
        TextEncoding::new("\t", "\r\n").with_collapse_white_spaces(false),
    ] {
        let bytes = write_all(&schema, encoding.clone(), TransformRegistry::default(), &blocks);
        let parsed = parse_all(&schema, encoding, TransformRegistry::default(), bytes);
        assert_eq!(parsed, blocks);
    }
}

#[test]
fn test_collapsed_white_space_input() {
    let schema = Component::record("r")
        .with_field(Component::scalar("a", DataType::I32))
        .and_then(|r| r.with_field(Component::scalar("b", DataType::F32)))
        .unwrap();
    let encoding = TextEncoding::new(",", "\n");
    let blocks = parse_all(
        &schema,
        encoding,
        TransformRegistry::default(),
        b"  1,   2.5\n\n3 ,4\n   ".to_vec(),
    );
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].get_int(0).unwrap(), 1);
    assert_eq!(blocks[1].get_double(1).unwrap(), 4.0);
}

#[test]
fn test_stop_from_another_thread() {
    let schema = Component::record("r")
        .with_field(Component::scalar("i", DataType::U64))
        .and_then(|r| r.with_field(Component::scalar("v", DataType::F64)))
        .unwrap();
    let total = 100_000;
    let mut text = String::new();
    for i in 0..total {
        text.push_str(&format!("{i},{:?}\n", i as f64 / 3.0));
    }

    let mut parser = DataStreamParser::new();
    parser
        .set_data_components(schema)
        .unwrap()
        .set_data_encoding(TextEncoding::new(",", "\n"))
        .unwrap();
    let stop = parser.stop_handle();
    let (reached, wait_reached) = mpsc::channel::<()>();
    let (stopped, wait_stopped) = mpsc::channel::<()>();
    let stopper = thread::spawn(move || {
        wait_reached.recv().unwrap();
        stop.stop();
        stopped.send(()).unwrap();
    });

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    parser.set_data_handler(move |_: &Component, block: &DataBlock| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(block.get_int(0).unwrap(), n as i64 - 1);
        if n == 100 {
            reached.send(()).unwrap();
            wait_stopped.recv().unwrap();
        }
    });

    let state = parser.parse(std::io::Cursor::new(text.into_bytes())).unwrap();
    stopper.join().unwrap();
    assert_eq!(state, StreamState::Stopped);
    assert_eq!(seen.load(Ordering::SeqCst), 100);
    assert_eq!(parser.records_parsed(), 100);
    assert!(parser.parse_next_element().unwrap().is_none());
}

#[test]
fn test_parse_path() {
    let schema = Component::record("r")
        .with_field(Component::scalar("name", DataType::Ascii))
        .unwrap();
    let file = std::env::temp_dir().join(format!("swe-common-{}.txt", std::process::id()));
    std::fs::write(&file, "a\nb\nc\n").unwrap();
    let names = Arc::new(Mutex::new(vec![]));
    let sink = names.clone();
    let mut parser = DataStreamParser::new();
    parser
        .set_data_components(schema)
        .unwrap()
        .set_data_encoding(TextEncoding::new(",", "\n"))
        .unwrap()
        .set_data_handler(move |_: &Component, b: &DataBlock| {
            sink.lock().unwrap().push(b.get_string(0).unwrap().to_string());
        });
    let uri = format!("file://{}", file.display());
    assert_eq!(parser.parse_uri(&uri).unwrap(), StreamState::Exhausted);
    std::fs::remove_file(&file).unwrap();
    assert_eq!(*names.lock().unwrap(), vec!["a", "b", "c"]);
}
