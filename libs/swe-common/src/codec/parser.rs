use std::{
    io::{BufRead, Cursor},
    path::Path,
    sync::Arc,
};

use tracing::{debug, trace, warn};

use crate::{
    block::DataBlock,
    codec::{
        DEFAULT_MAX_ELEMENT_COUNT, DataHandler, Decode, ErrorHandler, RawDataHandler, StopHandle,
        StreamState,
        binary::{BinaryDecoder, BinaryLayout},
        io::{Input, open_path, open_uri},
        text::TextDecoder,
        transform::TransformRegistry,
    },
    component::Component,
    encoding::{ByteEncoding, DataEncoding, TextEncoding},
    error::Error,
};

pub(crate) enum Codec {
    Text(TextEncoding),
    Binary(BinaryLayout),
}

impl Codec {
    pub(crate) fn bind(
        schema: &Component,
        encoding: &DataEncoding,
        transforms: &TransformRegistry,
    ) -> Result<Self, Error> {
        Ok(match encoding {
            DataEncoding::Text(text) => {
                text.validate()?;
                Codec::Text(text.clone())
            }
            DataEncoding::Binary(binary) => {
                Codec::Binary(BinaryLayout::bind(schema, binary, transforms)?)
            }
        })
    }

    pub(crate) fn byte_encoding(&self) -> ByteEncoding {
        match self {
            Codec::Text(_) => ByteEncoding::Raw,
            Codec::Binary(layout) => layout.byte_encoding(),
        }
    }
}

struct RecordFailure {
    error: Error,
    /// The input position is lost and no further record can be read.
    fatal: bool,
}

impl From<Error> for RecordFailure {
    fn from(error: Error) -> Self {
        let fatal = error.is_fatal();
        RecordFailure { error, fatal }
    }
}

/// Reads one record at a time from a byte stream into [`DataBlock`]s.
///
/// ```
/// use swe_common::{Component, DataEncoding, DataStreamParser, DataType, TextEncoding};
///
/// let schema = Component::record("obs")
///     .with_field(Component::scalar("t", DataType::F64))?
///     .with_field(Component::scalar("ok", DataType::Bool))?;
/// let mut parser = DataStreamParser::new();
/// parser
///     .set_data_components(schema)?
///     .set_data_encoding(DataEncoding::Text(TextEncoding::new(",", "\n")))?
///     .set_input(&b"1.5,true\n2.5,false\n"[..])?;
/// let first = parser.parse_next_element()?.expect("one record");
/// assert_eq!(first.get_double(0)?, 1.5);
/// # Ok::<(), swe_common::Error>(())
/// ```
pub struct DataStreamParser {
    schema: Option<Arc<Component>>,
    encoding: Option<DataEncoding>,
    codec: Option<Codec>,
    transforms: TransformRegistry,
    state: StreamState,
    input: Option<Input>,
    data_handler: Option<Box<dyn DataHandler>>,
    raw_handler: Option<Box<dyn RawDataHandler>>,
    error_handler: Option<Box<dyn ErrorHandler>>,
    stop: StopHandle,
    renew_block: bool,
    max_element_count: usize,
    parsed: u64,
    rejected: u64,
}

impl Default for DataStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DataStreamParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStreamParser")
            .field("state", &self.state)
            .field("parsed", &self.parsed)
            .field("rejected", &self.rejected)
            .finish_non_exhaustive()
    }
}

impl DataStreamParser {
    pub fn new() -> Self {
        DataStreamParser {
            schema: None,
            encoding: None,
            codec: None,
            transforms: TransformRegistry::default(),
            state: StreamState::Unconfigured,
            input: None,
            data_handler: None,
            raw_handler: None,
            error_handler: None,
            stop: StopHandle::default(),
            renew_block: true,
            max_element_count: DEFAULT_MAX_ELEMENT_COUNT,
            parsed: 0,
            rejected: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn data_components(&self) -> Option<&Component> {
        self.schema.as_deref()
    }

    pub fn data_encoding(&self) -> Option<&DataEncoding> {
        self.encoding.as_ref()
    }

    /// Records delivered since the last input was bound.
    pub fn records_parsed(&self) -> u64 {
        self.parsed
    }

    /// Records discarded because of a per-record error since the last input was bound.
    pub fn records_rejected(&self) -> u64 {
        self.rejected
    }

    fn check_not_running(&self, op: &'static str) -> Result<(), Error> {
        if self.state == StreamState::Running {
            return Err(Error::InvalidState {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, state: StreamState) {
        if self.state == state {
            return;
        }
        let per_record = matches!(
            (self.state, state),
            (StreamState::Open, StreamState::Running) | (StreamState::Running, StreamState::Open)
        );
        if !per_record {
            debug!(from = %self.state, to = %state, "parser state");
        }
        self.state = state;
    }

    fn configure(&mut self) -> Result<(), Error> {
        let (Some(schema), Some(encoding)) = (&self.schema, &self.encoding) else {
            return Ok(());
        };
        self.codec = Some(Codec::bind(schema, encoding, &self.transforms)?);
        if self.state == StreamState::Unconfigured {
            self.transition(StreamState::Configured);
        }
        Ok(())
    }

    pub fn set_data_components(
        &mut self,
        schema: impl Into<Arc<Component>>,
    ) -> Result<&mut Self, Error> {
        self.check_not_running("set data components")?;
        let schema = schema.into();
        schema.validate()?;
        debug!(root = %schema.name, atoms = ?schema.fixed_atom_count(), "data components set");
        let previous = self.schema.replace(schema);
        if let Err(err) = self.configure() {
            self.schema = previous;
            return Err(err);
        }
        Ok(self)
    }

    pub fn set_data_encoding(&mut self, encoding: impl Into<DataEncoding>) -> Result<&mut Self, Error> {
        self.check_not_running("set data encoding")?;
        let encoding = encoding.into();
        encoding.validate()?;
        let previous = self.encoding.replace(encoding);
        if let Err(err) = self.configure() {
            self.encoding = previous;
            return Err(err);
        }
        Ok(self)
    }

    /// Replaces the compression and encryption schemes available to binary blocks.
    pub fn set_transforms(&mut self, transforms: TransformRegistry) -> Result<&mut Self, Error> {
        self.check_not_running("set transforms")?;
        let previous = std::mem::replace(&mut self.transforms, transforms);
        if let Err(err) = self.configure() {
            self.transforms = previous;
            return Err(err);
        }
        Ok(self)
    }

    /// With `false`, [`parse`](Self::parse) decodes every record into the same block.
    pub fn set_renew_block(&mut self, renew: bool) -> &mut Self {
        self.renew_block = renew;
        self
    }

    pub fn set_max_element_count(&mut self, max: usize) -> &mut Self {
        self.max_element_count = max;
        self
    }

    pub fn set_data_handler(&mut self, handler: impl DataHandler + 'static) -> &mut Self {
        self.data_handler = Some(Box::new(handler));
        self
    }

    pub fn set_raw_data_handler(&mut self, handler: impl RawDataHandler + 'static) -> &mut Self {
        self.raw_handler = Some(Box::new(handler));
        self
    }

    pub fn set_error_handler(&mut self, handler: impl ErrorHandler + 'static) -> &mut Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn set_input(&mut self, input: impl BufRead + Send + 'static) -> Result<&mut Self, Error> {
        self.check_not_running("set input")?;
        let Some(codec) = &self.codec else {
            return Err(Error::InvalidState {
                op: "set input",
                state: self.state,
            });
        };
        if self.state.is_terminal() {
            return Err(Error::InvalidState {
                op: "set input",
                state: self.state,
            });
        }
        self.input = Some(Input::new(Box::new(input), codec.byte_encoding()));
        self.parsed = 0;
        self.rejected = 0;
        self.transition(StreamState::Open);
        Ok(self)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Asks the running loop to stop at the next record boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Releases the input and returns to `Configured`, keeping schema, encoding and handlers.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.check_not_running("reset")?;
        self.input = None;
        self.stop.clear();
        let state = if self.codec.is_some() {
            StreamState::Configured
        } else {
            StreamState::Unconfigured
        };
        self.transition(state);
        Ok(())
    }

    /// Decodes the next record, or returns `None` once the input is exhausted or stopped.
    ///
    /// Registered handlers see the record before it is returned. Per-record errors go to the
    /// error handler when there is one and the next record is tried; otherwise they are
    /// returned and the parser stays ready for the following record.
    pub fn parse_next_element(&mut self) -> Result<Option<DataBlock>, Error> {
        let schema = self.schema.clone().ok_or(Error::InvalidState {
            op: "parse",
            state: self.state,
        })?;
        let mut block = schema.create_block();
        Ok(self.step(&schema, &mut block)?.then_some(block))
    }

    /// Decodes records until the input is exhausted or the parser is stopped, feeding them to
    /// the data handler. Returns the final state.
    pub fn run(&mut self) -> Result<StreamState, Error> {
        let schema = self.schema.clone().ok_or(Error::InvalidState {
            op: "parse",
            state: self.state,
        })?;
        let mut block = schema.create_block();
        while self.step(&schema, &mut block)? {
            if self.renew_block {
                block = schema.create_block();
            }
        }
        debug!(parsed = self.parsed, rejected = self.rejected, state = %self.state, "stream done");
        Ok(self.state)
    }

    pub fn parse(&mut self, input: impl BufRead + Send + 'static) -> Result<StreamState, Error> {
        self.set_input(input)?;
        self.run()
    }

    pub fn parse_path(&mut self, path: impl AsRef<Path>) -> Result<StreamState, Error> {
        self.check_not_running("parse")?;
        let input = open_path(path.as_ref())?;
        self.parse(input)
    }

    /// Like [`parse_path`](Self::parse_path), for a local path or a `file://` URI.
    pub fn parse_uri(&mut self, uri: &str) -> Result<StreamState, Error> {
        self.check_not_running("parse")?;
        let input = open_uri(uri)?;
        self.parse(input)
    }

    /// Decodes exactly one record from an in-memory frame, replacing the current input.
    pub fn parse_bytes(&mut self, frame: &[u8]) -> Result<Option<DataBlock>, Error> {
        if self.state.is_terminal() {
            self.reset()?;
        }
        self.set_input(Cursor::new(frame.to_vec()))?;
        self.parse_next_element()
    }

    fn step(&mut self, schema: &Component, block: &mut DataBlock) -> Result<bool, Error> {
        match self.state {
            StreamState::Open | StreamState::Running => {}
            StreamState::Stopped | StreamState::Exhausted => return Ok(false),
            state => return Err(Error::InvalidState { op: "parse", state }),
        }
        self.transition(StreamState::Running);
        loop {
            if self.stop.is_stopped() {
                self.transition(StreamState::Stopped);
                return Ok(false);
            }
            let failure = match self.decode_record(schema, block) {
                Ok(None) => {
                    self.transition(StreamState::Exhausted);
                    return Ok(false);
                }
                Ok(Some(raw)) => {
                    self.parsed += 1;
                    trace!(record = self.parsed, atoms = block.atom_count(), "record decoded");
                    if let Some(handler) = &mut self.raw_handler {
                        handler.on_raw_block(&raw);
                    }
                    if let Some(handler) = &mut self.data_handler {
                        handler.on_block(schema, block);
                    }
                    self.transition(StreamState::Open);
                    return Ok(true);
                }
                Err(failure) => failure,
            };
            *block = schema.create_block();
            self.rejected += 1;
            let RecordFailure { error, fatal } = failure;
            if fatal {
                self.transition(StreamState::Failed);
            } else {
                warn!(%error, "record discarded");
            }
            let Some(handler) = &mut self.error_handler else {
                if !fatal {
                    self.transition(StreamState::Open);
                }
                return Err(error);
            };
            let flow = handler.on_error(&error);
            if fatal {
                return Err(error);
            }
            if flow.is_break() {
                self.transition(StreamState::Stopped);
                return Ok(false);
            }
        }
    }

    /// Decodes one record into `block`, returning the bytes it was read from (empty unless a
    /// raw handler is registered), or `None` at the end of the input.
    fn decode_record(
        &mut self,
        schema: &Component,
        block: &mut DataBlock,
    ) -> Result<Option<Vec<u8>>, RecordFailure> {
        let capture = self.raw_handler.is_some();
        let max = self.max_element_count;
        let (Some(codec), Some(input)) = (&self.codec, &mut self.input) else {
            return Err(Error::InvalidState {
                op: "parse",
                state: self.state,
            }
            .into());
        };
        match codec {
            Codec::Text(encoding) => {
                if TextDecoder::new(input, encoding).at_end()? {
                    return Ok(None);
                }
                if capture {
                    input.start_capture();
                }
                let mut decoder = TextDecoder::new(input, encoding);
                let mut result = Decode::new(&mut decoder, max).block(schema, block);
                if result.is_ok() {
                    result = decoder.finish_record(&schema.name);
                }
                if let Err(error) = result {
                    if !error.is_fatal() {
                        decoder.recover()?;
                    }
                    input.take_capture();
                    return Err(error.into());
                }
            }
            Codec::Binary(layout) => {
                if input.at_end().map_err(Error::from)? {
                    return Ok(None);
                }
                if capture {
                    input.start_capture();
                }
                let mut decoder = BinaryDecoder::new(layout, input);
                if let Err(error) = Decode::new(&mut decoder, max).block(schema, block) {
                    return Err(RecordFailure { error, fatal: true });
                }
                decoder.finish_record();
                if let Some(error) = decoder.take_deferred() {
                    input.take_capture();
                    return Err(error.into());
                }
            }
        }
        Ok(Some(input.take_capture()))
    }
}

#[cfg(test)]
mod tests {
    use core::ops::ControlFlow;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{DataType, ElementCount, ErrorKind};

    fn schema() -> Component {
        Component::record("obs")
            .with_field(Component::scalar("n", DataType::I32))
            .and_then(|r| {
                r.with_field(Component::array(
                    "v",
                    Component::scalar("x", DataType::F64),
                    ElementCount::Ref("n".into()),
                ))
            })
            .unwrap()
    }

    fn parser(input: &'static str) -> DataStreamParser {
        let mut parser = DataStreamParser::new();
        parser
            .set_data_components(schema())
            .unwrap()
            .set_data_encoding(TextEncoding::new(",", "\n"))
            .unwrap()
            .set_input(input.as_bytes())
            .unwrap();
        parser
    }

    #[test]
    fn test_state_machine() {
        let mut parser = DataStreamParser::new();
        assert_eq!(parser.state(), StreamState::Unconfigured);
        assert!(matches!(
            parser.set_input(&b""[..]),
            Err(Error::InvalidState { .. })
        ));
        parser.set_data_components(schema()).unwrap();
        assert_eq!(parser.state(), StreamState::Unconfigured);
        parser
            .set_data_encoding(TextEncoding::new(",", "\n"))
            .unwrap();
        assert_eq!(parser.state(), StreamState::Configured);
        parser.set_input(&b"1,2.0\n"[..]).unwrap();
        assert_eq!(parser.state(), StreamState::Open);
        assert!(parser.parse_next_element().unwrap().is_some());
        assert!(parser.parse_next_element().unwrap().is_none());
        assert_eq!(parser.state(), StreamState::Exhausted);
        assert!(parser.set_input(&b""[..]).is_err());
        parser.reset().unwrap();
        assert_eq!(parser.state(), StreamState::Configured);
        parser.set_input(&b"0\n"[..]).unwrap();
        let block = parser.parse_next_element().unwrap().unwrap();
        assert_eq!(block.atom_count(), 1);
    }

    #[test]
    fn test_variable_records() {
        let mut parser = parser("2,1.5,2.5\n0\n1,-1.0\n");
        let counts: Vec<usize> = std::iter::from_fn(|| parser.parse_next_element().unwrap())
            .map(|b| b.atom_count())
            .collect();
        assert_eq!(counts, vec![3, 1, 2]);
        assert_eq!(parser.records_parsed(), 3);
    }

    #[test]
    fn test_error_without_handler_keeps_stream_usable() {
        let mut parser = parser("2,1.5\n1,oops\n1,3.0\n");
        let err = parser.parse_next_element().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenFormat);
        assert_eq!(parser.state(), StreamState::Open);
        let err = parser.parse_next_element().unwrap_err();
        assert_eq!(err.path(), Some("v/0"));
        let block = parser.parse_next_element().unwrap().unwrap();
        assert_eq!(block.get_double(1).unwrap(), 3.0);
        assert_eq!(parser.records_rejected(), 2);
    }

    #[test]
    fn test_error_handler_flow() {
        let errors = Arc::new(Mutex::new(vec![]));
        let blocks = Arc::new(Mutex::new(vec![]));
        let mut parser = parser("1,x\n1,2.0\n1,y\n1,3.0\n");
        let seen = errors.clone();
        let out = blocks.clone();
        parser
            .set_error_handler(move |e: &Error| {
                let mut seen = seen.lock().unwrap();
                seen.push(e.kind());
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .set_data_handler(move |_: &Component, b: &DataBlock| {
                out.lock().unwrap().push(b.get_double(1).unwrap());
            });
        assert_eq!(parser.run().unwrap(), StreamState::Stopped);
        assert_eq!(*blocks.lock().unwrap(), vec![2.0]);
        assert_eq!(errors.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_raw_handler_sees_record_bytes() {
        let raw = Arc::new(Mutex::new(vec![]));
        let sink = raw.clone();
        let mut parser = parser("1,2.0\n0\n");
        parser.set_raw_data_handler(move |bytes: &[u8]| {
            sink.lock().unwrap().push(bytes.to_vec());
        });
        parser.run().unwrap();
        assert_eq!(
            *raw.lock().unwrap(),
            vec![b"1,2.0\n".to_vec(), b"0\n".to_vec()]
        );
    }

    #[test]
    fn test_reused_block() {
        let sizes = Arc::new(Mutex::new(vec![]));
        let sink = sizes.clone();
        let mut parser = parser("3,1.0,2.0,3.0\n1,4.0\n");
        parser
            .set_renew_block(false)
            .set_data_handler(move |_: &Component, b: &DataBlock| {
                sink.lock().unwrap().push(b.atom_count());
            });
        parser.run().unwrap();
        assert_eq!(*sizes.lock().unwrap(), vec![4, 2]);
    }

    #[test]
    fn test_max_element_count() {
        let mut parser = parser("100000\n");
        parser.set_max_element_count(10);
        let err = parser.parse_next_element().unwrap_err();
        assert!(matches!(err, Error::CountOverflow { max: 10, .. }));
    }

    #[test]
    fn test_stop_before_parse() {
        let mut parser = parser("1,2.0\n");
        parser.stop_handle().stop();
        assert_eq!(parser.run().unwrap(), StreamState::Stopped);
        assert_eq!(parser.records_parsed(), 0);
    }
}
