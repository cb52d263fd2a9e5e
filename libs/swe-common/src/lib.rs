//! Schema-driven streaming of nested sensor records.
//!
//! A [`Component`] tree describes the shape of one record once; a [`DataBlock`] holds the
//! values of one record and follows the tree through every resize of its variable arrays.
//! [`DataStreamParser`] and [`DataStreamWriter`] move blocks to and from delimited text or
//! packed binary streams one record at a time, and [`StreamDemux`] routes interleaved
//! records of several schemas to their parsers.

pub mod block;
pub mod codec;
pub mod component;
pub mod demux;
pub mod encoding;
pub mod error;
mod resize;
pub mod types;

pub use block::{CompositeBlock, DataBlock};
pub use codec::{
    DEFAULT_MAX_ELEMENT_COUNT, DataHandler, DataStreamParser, DataStreamWriter, ErrorHandler,
    RawDataHandler, StopHandle, StreamState,
    binary::BinaryLayout,
    transform::{Cipher, Compressor, TransformRegistry},
};
pub use component::{Component, ComponentKind, DataPath, ElementCount, Layout, PathSegment};
pub use demux::{
    BinaryFraming, MAX_TEXT_RECORD_LEN, RecordSource, StreamDemux, TaggedRecord, TextFraming,
};
pub use encoding::{
    BinaryBlock, BinaryComponent, BinaryEncoding, BinaryMember, ByteEncoding, ByteOrder,
    DataEncoding, PhysicalType, TextEncoding,
};
pub use error::{Error, ErrorKind};
pub use types::{DataType, Value};
