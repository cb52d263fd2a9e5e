use std::{
    io::{BufRead, Write},
    sync::Arc,
};

use swe_common::{
    Component, DataEncoding, DataStreamParser, DataStreamWriter, Error, StreamState,
    TransformRegistry,
};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub converted: u64,
    pub rejected: u64,
}

/// Decodes every record of `input` with `from` and re-encodes it to `output` with `to`.
///
/// Records that fail to decode are skipped and counted; a failure that loses the stream
/// position ends the run with an error.
pub fn transcode(
    schema: Component,
    from: DataEncoding,
    to: DataEncoding,
    input: impl BufRead + Send + 'static,
    output: impl Write + Send + 'static,
) -> Result<Summary, Error> {
    let schema = Arc::new(schema);
    let mut parser = DataStreamParser::new();
    parser
        .set_transforms(TransformRegistry::default())?
        .set_data_components(schema.clone())?
        .set_data_encoding(from)?
        .set_input(input)?;
    let mut writer = DataStreamWriter::new();
    writer
        .set_data_components(schema)?
        .set_data_encoding(to)?
        .set_output(output)?;

    let mut summary = Summary::default();
    loop {
        match parser.parse_next_element() {
            Ok(Some(block)) => {
                writer.write(&block)?;
                summary.converted += 1;
            }
            Ok(None) => break,
            Err(error) if parser.state() != StreamState::Failed => {
                warn!(%error, "record rejected");
                summary.rejected += 1;
            }
            Err(error) => return Err(error),
        }
    }
    writer.close()?;
    debug!(?summary, "transcode done");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::{Arc, Mutex},
    };

    use swe_common::{BinaryEncoding, ByteEncoding, ByteOrder, DataType, TextEncoding};

    use super::*;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn schema() -> Component {
        Component::record("r")
            .with_field(Component::scalar("a", DataType::U32))
            .and_then(|r| r.with_field(Component::scalar("b", DataType::F64)))
            .unwrap()
    }

    #[test]
    fn test_text_to_binary_and_back() {
        let text = TextEncoding::new(",", "\n");
        let binary = BinaryEncoding::new(ByteOrder::LittleEndian, ByteEncoding::Raw);
        let sink = Sink::default();
        let summary = transcode(
            schema(),
            text.clone().into(),
            binary.clone().into(),
            Cursor::new(b"1,0.5\noops,1.0\n2,-3.25\n".to_vec()),
            sink.clone(),
        )
        .unwrap();
        assert_eq!(
            summary,
            Summary {
                converted: 2,
                rejected: 1
            }
        );
        let bytes = sink.0.lock().unwrap().clone();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);

        let back = Sink::default();
        transcode(
            schema(),
            binary.into(),
            text.into(),
            Cursor::new(bytes),
            back.clone(),
        )
        .unwrap();
        assert_eq!(&*back.0.lock().unwrap(), b"1,0.5\n2,-3.25\n");
    }

    #[test]
    fn test_truncated_binary_input_fails() {
        let binary = BinaryEncoding::new(ByteOrder::BigEndian, ByteEncoding::Raw);
        let result = transcode(
            schema(),
            binary.into(),
            TextEncoding::default().into(),
            Cursor::new(vec![0, 0, 0, 1, 0]),
            Sink::default(),
        );
        assert!(result.is_err());
    }
}
