//! Routing of interleaved, cluster tagged records to per-cluster parsers.
//!
//! A [`RecordSource`] cuts the physical stream into [`TaggedRecord`]s; [`StreamDemux`] hands
//! each payload to the [`DataStreamParser`] registered for its cluster id.

use core::ops::ControlFlow;
use std::io::{BufRead, ErrorKind as IoErrorKind, Read, Write};

use tracing::{debug, trace, warn};

use crate::{
    block::DataBlock,
    codec::{DataStreamParser, ErrorHandler, StopHandle},
    error::Error,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedRecord {
    pub cluster_id: String,
    pub payload: Vec<u8>,
}

pub trait RecordSource {
    /// Next record, or `None` at the end of the stream.
    fn next_record(&mut self) -> Result<Option<TaggedRecord>, Error>;
}

impl<I> RecordSource for I
where
    I: Iterator<Item = TaggedRecord>,
{
    fn next_record(&mut self) -> Result<Option<TaggedRecord>, Error> {
        Ok(self.next())
    }
}

/// Longest text framed record, separator included.
pub const MAX_TEXT_RECORD_LEN: usize = 1 << 20;

/// `A<tag sep>1,2,3<record sep>`: the cluster id, then a complete text record.
///
/// The record separator is kept at the end of the payload, so it should match the block
/// separator of the cluster's text encoding.
pub struct TextFraming<R> {
    input: R,
    tag_separator: String,
    record_separator: String,
}

impl<R: BufRead> TextFraming<R> {
    pub fn new(input: R, tag_separator: impl Into<String>, record_separator: impl Into<String>) -> Self {
        TextFraming {
            input,
            tag_separator: tag_separator.into(),
            record_separator: record_separator.into(),
        }
    }

    fn read_until_separator(&mut self) -> Result<Vec<u8>, Error> {
        let sep = self.record_separator.as_bytes();
        let Some(&last) = sep.last() else {
            return Err(Error::InvalidEncoding("empty record separator".to_string()));
        };
        let mut record = vec![];
        loop {
            let budget = (MAX_TEXT_RECORD_LEN + 1 - record.len()) as u64;
            let n = (&mut self.input).take(budget).read_until(last, &mut record)?;
            if record.len() > MAX_TEXT_RECORD_LEN {
                return Err(Error::TokenFormat {
                    path: String::new(),
                    token: String::from_utf8_lossy(&record[..32]).into_owned(),
                    expected: format!("record of at most {MAX_TEXT_RECORD_LEN} bytes"),
                });
            }
            if n == 0 || record.ends_with(sep) {
                return Ok(record);
            }
        }
    }
}

impl<R: BufRead> RecordSource for TextFraming<R> {
    fn next_record(&mut self) -> Result<Option<TaggedRecord>, Error> {
        loop {
            let record = self.read_until_separator()?;
            if record.is_empty() {
                return Ok(None);
            }
            if record == self.record_separator.as_bytes() {
                continue;
            }
            let tag = self.tag_separator.as_bytes();
            let Some(split) = record.windows(tag.len()).position(|w| w == tag) else {
                return Err(Error::TokenFormat {
                    path: String::new(),
                    token: String::from_utf8_lossy(&record).into_owned(),
                    expected: format!("cluster id followed by `{}`", self.tag_separator),
                });
            };
            let cluster_id = String::from_utf8_lossy(&record[..split]).trim().to_string();
            let payload = record[split + tag.len()..].to_vec();
            return Ok(Some(TaggedRecord {
                cluster_id,
                payload,
            }));
        }
    }
}

/// `u16` id length, UTF-8 id, `u32` payload length, payload. Prefixes are little-endian.
pub struct BinaryFraming<R> {
    input: R,
}

impl<R: BufRead> BinaryFraming<R> {
    pub fn new(input: R) -> Self {
        BinaryFraming { input }
    }

    /// Writes one frame in the layout read by [`BinaryFraming`].
    pub fn write_frame(out: &mut impl Write, record: &TaggedRecord) -> Result<(), Error> {
        let id_len = u16::try_from(record.cluster_id.len())
            .map_err(|_| Error::InvalidEncoding("cluster id too long".to_string()))?;
        let len = u32::try_from(record.payload.len())
            .map_err(|_| Error::InvalidEncoding("record payload too long".to_string()))?;
        out.write_all(&id_len.to_le_bytes())?;
        out.write_all(record.cluster_id.as_bytes())?;
        out.write_all(&len.to_le_bytes())?;
        out.write_all(&record.payload)?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.input.read_exact(buf).map_err(|err| {
            if err.kind() == IoErrorKind::UnexpectedEof {
                truncated()
            } else {
                Error::Io(err)
            }
        })
    }

    /// Reads a length prefixed field without trusting the prefix for the allocation.
    fn read_field(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut field = Vec::new();
        (&mut self.input).take(len as u64).read_to_end(&mut field)?;
        if field.len() < len {
            return Err(truncated());
        }
        Ok(field)
    }
}

fn truncated() -> Error {
    Error::BinaryFormat {
        path: String::new(),
        detail: "truncated record frame".to_string(),
    }
}

impl<R: BufRead> RecordSource for BinaryFraming<R> {
    fn next_record(&mut self) -> Result<Option<TaggedRecord>, Error> {
        if self.input.fill_buf()?.is_empty() {
            return Ok(None);
        }
        let mut len = [0u8; 2];
        self.read_exact(&mut len)?;
        let id = self.read_field(u16::from_le_bytes(len) as usize)?;
        let cluster_id = String::from_utf8(id).map_err(|_| Error::BinaryFormat {
            path: String::new(),
            detail: "cluster id is not utf-8".to_string(),
        })?;
        let mut len = [0u8; 4];
        self.read_exact(&mut len)?;
        let payload = self.read_field(u32::from_le_bytes(len) as usize)?;
        Ok(Some(TaggedRecord {
            cluster_id,
            payload,
        }))
    }
}

/// Parsers keyed by cluster id, in registration order.
#[derive(Default)]
pub struct StreamDemux {
    parsers: Vec<(String, DataStreamParser)>,
    error_handler: Option<Box<dyn ErrorHandler>>,
    stop: StopHandle,
}

impl StreamDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `parser` for `cluster_id`, returning the parser it replaces.
    pub fn add_data_parser(
        &mut self,
        cluster_id: impl Into<String>,
        parser: DataStreamParser,
    ) -> Option<DataStreamParser> {
        let cluster_id = cluster_id.into();
        debug!(%cluster_id, "cluster registered");
        match self.parsers.iter_mut().find(|(id, _)| *id == cluster_id) {
            Some((_, existing)) => Some(std::mem::replace(existing, parser)),
            None => {
                self.parsers.push((cluster_id, parser));
                None
            }
        }
    }

    pub fn remove_data_parser(&mut self, cluster_id: &str) -> Option<DataStreamParser> {
        let index = self.parsers.iter().position(|(id, _)| id == cluster_id)?;
        Some(self.parsers.remove(index).1)
    }

    pub fn get_data_parser(&self, cluster_id: &str) -> Option<&DataStreamParser> {
        self.parsers
            .iter()
            .find(|(id, _)| id == cluster_id)
            .map(|(_, p)| p)
    }

    pub fn get_data_parser_mut(&mut self, cluster_id: &str) -> Option<&mut DataStreamParser> {
        self.parsers
            .iter_mut()
            .find(|(id, _)| id == cluster_id)
            .map(|(_, p)| p)
    }

    pub fn cluster_ids(&self) -> impl Iterator<Item = &str> {
        self.parsers.iter().map(|(id, _)| id.as_str())
    }

    /// Receives routing errors and errors returned by cluster parsers.
    pub fn set_error_handler(&mut self, handler: impl ErrorHandler + 'static) -> &mut Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    fn report(&mut self, error: Error) -> Result<ControlFlow<()>, Error> {
        match &mut self.error_handler {
            Some(handler) => Ok(handler.on_error(&error)),
            None if error.is_fatal() => Err(error),
            None => {
                warn!(%error, "record skipped");
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    /// Routes one record to its cluster's parser.
    ///
    /// Returns the decoded block, or `None` when the record was skipped.
    pub fn dispatch(&mut self, record: TaggedRecord) -> Result<Option<DataBlock>, Error> {
        trace!(cluster_id = %record.cluster_id, bytes = record.payload.len(), "dispatch");
        let Some(parser) = self.get_data_parser_mut(&record.cluster_id) else {
            self.report(Error::UnknownCluster(record.cluster_id))?;
            return Ok(None);
        };
        match parser.parse_bytes(&record.payload) {
            Ok(block) => Ok(block),
            Err(error) => {
                self.report(error)?;
                Ok(None)
            }
        }
    }

    /// Dispatches every record of `source` until it is exhausted, [`stop`](Self::stop) is
    /// called or the error handler breaks. Returns the number of records decoded.
    ///
    /// A stop requested before the call ends the run before the first record. The request is
    /// consumed by the run it ends, so a later call starts afresh.
    pub fn run(&mut self, source: &mut dyn RecordSource) -> Result<u64, Error> {
        let mut decoded = 0;
        let mut stopped = false;
        loop {
            if self.stop.is_stopped() {
                self.stop.clear();
                stopped = true;
                break;
            }
            let Some(record) = source.next_record()? else {
                break;
            };
            let Some(parser) = self.get_data_parser_mut(&record.cluster_id) else {
                if self.report(Error::UnknownCluster(record.cluster_id))?.is_break() {
                    break;
                }
                continue;
            };
            match parser.parse_bytes(&record.payload) {
                Ok(Some(_)) => decoded += 1,
                Ok(None) => {}
                Err(error) => {
                    if self.report(error)?.is_break() {
                        break;
                    }
                }
            }
        }
        debug!(decoded, stopped, "demux done");
        Ok(decoded)
    }
}
