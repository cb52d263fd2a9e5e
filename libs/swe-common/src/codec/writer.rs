use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Arc,
};

use tracing::{debug, trace, warn};

use crate::{
    block::DataBlock,
    codec::{
        Encode, ErrorHandler, StreamState,
        binary::BinaryEncoder,
        io::Output,
        parser::Codec,
        text::TextEncoder,
        transform::TransformRegistry,
    },
    component::Component,
    encoding::DataEncoding,
    error::Error,
};

/// Writes [`DataBlock`]s to a byte stream, one record per [`write`](Self::write).
///
/// Each record is fully encoded before any of its bytes reach the output, so a record that
/// fails to encode leaves the output untouched.
pub struct DataStreamWriter {
    schema: Option<Arc<Component>>,
    encoding: Option<DataEncoding>,
    codec: Option<Codec>,
    transforms: TransformRegistry,
    state: StreamState,
    output: Option<Output>,
    error_handler: Option<Box<dyn ErrorHandler>>,
    written: u64,
}

impl Default for DataStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStreamWriter {
    pub fn new() -> Self {
        DataStreamWriter {
            schema: None,
            encoding: None,
            codec: None,
            transforms: TransformRegistry::default(),
            state: StreamState::Unconfigured,
            output: None,
            error_handler: None,
            written: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }

    fn transition(&mut self, state: StreamState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "writer state");
            self.state = state;
        }
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

    pub fn set_transforms(&mut self, transforms: TransformRegistry) -> Result<&mut Self, Error> {
        self.check_not_running("set transforms")?;
        let previous = std::mem::replace(&mut self.transforms, transforms);
        if let Err(err) = self.configure() {
            self.transforms = previous;
            return Err(err);
        }
        Ok(self)
    }

    /// Per-record encode errors go to `handler` and the record is skipped.
    pub fn set_error_handler(&mut self, handler: impl ErrorHandler + 'static) -> &mut Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn set_output(&mut self, output: impl Write + Send + 'static) -> Result<&mut Self, Error> {
        self.check_not_running("set output")?;
        let Some(codec) = &self.codec else {
            return Err(Error::InvalidState {
                op: "set output",
                state: self.state,
            });
        };
        if self.output.is_some() {
            return Err(Error::InvalidState {
                op: "set output",
                state: self.state,
            });
        }
        self.output = Some(Output::new(Box::new(output), codec.byte_encoding()));
        self.written = 0;
        self.transition(StreamState::Open);
        Ok(self)
    }

    pub fn set_output_path(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, Error> {
        let file = File::create(path.as_ref())?;
        self.set_output(BufWriter::new(file))
    }

    fn encode(&self, block: &DataBlock) -> Result<Vec<u8>, Error> {
        let (Some(schema), Some(codec)) = (&self.schema, &self.codec) else {
            return Err(Error::InvalidState {
                op: "write",
                state: self.state,
            });
        };
        Ok(match codec {
            Codec::Text(encoding) => {
                let mut encoder = TextEncoder::new(encoding);
                Encode::new(&mut encoder).block(schema, block)?;
                encoder.finish().into_bytes()
            }
            Codec::Binary(layout) => {
                let mut encoder = BinaryEncoder::new(layout);
                Encode::new(&mut encoder).block(schema, block)?;
                encoder.finish()
            }
        })
    }

    /// Encodes and writes one record.
    pub fn write(&mut self, block: &DataBlock) -> Result<(), Error> {
        if self.state != StreamState::Open {
            return Err(Error::InvalidState {
                op: "write",
                state: self.state,
            });
        }
        let bytes = match self.encode(block) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "record not written");
                let Some(handler) = &mut self.error_handler else {
                    return Err(error);
                };
                if handler.on_error(&error).is_break() {
                    self.transition(StreamState::Stopped);
                }
                return Ok(());
            }
        };
        self.transition(StreamState::Running);
        let Some(output) = &mut self.output else {
            self.transition(StreamState::Failed);
            return Err(Error::InvalidState {
                op: "write",
                state: self.state,
            });
        };
        if let Err(err) = output.write_all(&bytes) {
            self.transition(StreamState::Failed);
            return Err(err.into());
        }
        self.written += 1;
        trace!(record = self.written, bytes = bytes.len(), "record written");
        self.transition(StreamState::Open);
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        let Some(output) = &mut self.output else {
            return Err(Error::InvalidState {
                op: "flush",
                state: self.state,
            });
        };
        if let Err(err) = output.flush() {
            self.transition(StreamState::Failed);
            return Err(err.into());
        }
        Ok(())
    }

    /// Finishes the byte encoding, flushes and releases the output.
    pub fn close(&mut self) -> Result<(), Error> {
        self.check_not_running("close")?;
        let Some(output) = self.output.take() else {
            return Ok(());
        };
        let result = output.finish();
        debug!(written = self.written, "writer closed");
        self.transition(StreamState::Configured);
        Ok(result?)
    }

    /// Drops the output without finishing it and returns to `Configured`.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.check_not_running("reset")?;
        self.output = None;
        let state = if self.codec.is_some() {
            StreamState::Configured
        } else {
            StreamState::Unconfigured
        };
        self.transition(state);
        Ok(())
    }
}
