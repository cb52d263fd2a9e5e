//! Packed binary encoding.
//!
//! Every scalar is written with its bound [`BinaryComponent`] options, or with the natural
//! physical type of its datatype when the encoding does not mention it. Bit fields are packed
//! most significant bit first and the stream is realigned to a byte boundary at the end of
//! each record and around every block.
//!
//! Block frames look like
//! ```text
//! padding_before x 0u8
//! raw bytes (exactly byte_length)            when the block has no transform
//! u32 len, transformed payload, zero fill    otherwise (fill up to byte_length when set)
//! padding_after x 0u8
//! ```

use std::{
    collections::HashMap,
    io::{self, Cursor, Read},
    sync::Arc,
};

use crate::{
    codec::{
        AtomReader, AtomWriter,
        transform::{Cipher, Compressor, TransformRegistry},
    },
    component::{Component, DataPath},
    encoding::{BinaryBlock, BinaryComponent, BinaryEncoding, BinaryMember, ByteEncoding, ByteOrder, PhysicalType},
    error::Error,
    types::{DataType, Value},
};

/// Largest transformed payload accepted in a block frame.
const MAX_BLOCK_LEN: usize = 1 << 28;

/// Upfront capacity for bit-unaligned byte reads.
const READ_CHUNK: usize = 4096;

fn key(comp: &Component) -> usize {
    comp as *const Component as usize
}

#[derive(Debug, Clone)]
struct BoundBlock {
    block: BinaryBlock,
    compressor: Option<Arc<dyn Compressor>>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl BoundBlock {
    fn has_transform(&self) -> bool {
        self.compressor.is_some() || self.cipher.is_some()
    }
}

/// A [`BinaryEncoding`] resolved against one component tree.
///
/// Members are keyed by the address of the component they refer to, so a layout is only valid
/// for the exact tree it was bound to.
#[derive(Debug, Clone)]
pub struct BinaryLayout {
    byte_order: ByteOrder,
    byte_encoding: ByteEncoding,
    components: HashMap<usize, BinaryComponent>,
    blocks: HashMap<usize, BoundBlock>,
}

impl BinaryLayout {
    pub fn bind(
        schema: &Component,
        encoding: &BinaryEncoding,
        registry: &TransformRegistry,
    ) -> Result<Self, Error> {
        encoding.validate()?;
        let mut layout = BinaryLayout {
            byte_order: encoding.byte_order,
            byte_encoding: encoding.byte_encoding,
            components: HashMap::new(),
            blocks: HashMap::new(),
        };
        for member in &encoding.members {
            match member {
                BinaryMember::Component(c) => {
                    let target = resolve_reference(schema, &c.reference)?;
                    let ty = target.data_type().ok_or_else(|| {
                        Error::InvalidEncoding(format!(
                            "`{}` is not a scalar or range",
                            c.reference
                        ))
                    })?;
                    if !c.data_type.carries(ty) {
                        return Err(Error::InvalidEncoding(format!(
                            "`{}`: {ty} values cannot be encoded as {}",
                            c.reference, c.data_type
                        )));
                    }
                    if layout.components.insert(key(target), c.clone()).is_some() {
                        return Err(Error::InvalidEncoding(format!(
                            "`{}` is encoded twice",
                            c.reference
                        )));
                    }
                }
                BinaryMember::Block(b) => {
                    let target = resolve_reference(schema, &b.reference)?;
                    let bound = BoundBlock {
                        block: b.clone(),
                        compressor: b
                            .compression
                            .as_deref()
                            .map(|id| registry.compressor(id))
                            .transpose()?,
                        cipher: b
                            .encryption
                            .as_deref()
                            .map(|id| registry.cipher(id))
                            .transpose()?,
                    };
                    if layout.blocks.insert(key(target), bound).is_some() {
                        return Err(Error::InvalidEncoding(format!(
                            "`{}` has two blocks",
                            b.reference
                        )));
                    }
                }
            }
        }
        Ok(layout)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn byte_encoding(&self) -> ByteEncoding {
        self.byte_encoding
    }

    fn options(&self, comp: &Component) -> Option<&BinaryComponent> {
        self.components.get(&key(comp))
    }

    fn block(&self, comp: &Component) -> Option<&BoundBlock> {
        self.blocks.get(&key(comp))
    }
}

/// Resolves a member reference, with or without a leading `/` or root name.
fn resolve_reference<'s>(schema: &'s Component, reference: &str) -> Result<&'s Component, Error> {
    let trimmed = reference.trim_start_matches('/');
    if let Ok(target) = schema.resolve_path(trimmed) {
        return Ok(target);
    }
    if let Some(rest) = trimmed
        .strip_prefix(schema.name.as_str())
        .filter(|r| r.is_empty() || r.starts_with('/'))
    {
        if let Ok(target) = schema.resolve_path(rest) {
            return Ok(target);
        }
    }
    Err(Error::InvalidEncoding(format!(
        "reference `{reference}` does not match any component"
    )))
}

fn map_io(path: &DataPath, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::BinaryFormat {
            path: path.to_string(),
            detail: "unexpected end of stream".to_string(),
        }
    } else {
        Error::Io(err)
    }
}

fn format_error(path: &DataPath, detail: impl Into<String>) -> Error {
    Error::BinaryFormat {
        path: path.to_string(),
        detail: detail.into(),
    }
}

/// Sign extends the low `bits` bits of `v`.
fn sign_extend(v: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

#[derive(Debug, Default)]
struct BitState {
    cur: u8,
    /// Unread low bits of `cur`.
    left: u8,
}

struct InFrame {
    key: usize,
    payload: Option<(Cursor<Vec<u8>>, BitState)>,
}

pub(crate) struct BinaryDecoder<'a> {
    layout: &'a BinaryLayout,
    input: &'a mut dyn Read,
    bits: BitState,
    frames: Vec<InFrame>,
    deferred: Option<Error>,
}

impl<'a> BinaryDecoder<'a> {
    pub fn new(layout: &'a BinaryLayout, input: &'a mut dyn Read) -> Self {
        BinaryDecoder {
            layout,
            input,
            bits: BitState::default(),
            frames: vec![],
            deferred: None,
        }
    }

    /// First value conversion error of the record, reported once the record is fully read.
    pub fn take_deferred(&mut self) -> Option<Error> {
        self.deferred.take()
    }

    /// Drops the unread bits of the last byte of the record.
    pub fn finish_record(&mut self) {
        self.bits.left = 0;
    }

    fn source(&mut self) -> (&mut dyn Read, &mut BitState) {
        match self.frames.iter_mut().rev().find_map(|f| f.payload.as_mut()) {
            Some((cursor, bits)) => (cursor as &mut dyn Read, bits),
            None => (&mut *self.input, &mut self.bits),
        }
    }

    fn align(&mut self) {
        self.source().1.left = 0;
    }

    fn read_bit(&mut self) -> io::Result<u8> {
        let (src, bits) = self.source();
        if bits.left == 0 {
            let mut b = [0u8];
            src.read_exact(&mut b)?;
            bits.cur = b[0];
            bits.left = 8;
        }
        bits.left -= 1;
        Ok((bits.cur >> bits.left) & 1)
    }

    fn read_bits(&mut self, n: u32) -> io::Result<u64> {
        let mut v = 0u64;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()? as u64;
        }
        Ok(v)
    }

    fn skip_bits(&mut self, n: u32) -> io::Result<()> {
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }

    /// Reads `n` bytes, growing the buffer only as bytes actually arrive.
    fn read_bytes(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let (src, bits) = self.source();
        if bits.left == 0 {
            let mut out = Vec::new();
            Read::take(src, n as u64).read_to_end(&mut out)?;
            if out.len() < n {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            return Ok(out);
        }
        let mut out = Vec::with_capacity(n.min(READ_CHUNK));
        for _ in 0..n {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    fn read_uint(&mut self, width: usize) -> io::Result<u64> {
        let bytes = self.read_bytes(width)?;
        let fold = |acc: u64, b: &u8| (acc << 8) | *b as u64;
        Ok(match self.layout.byte_order {
            ByteOrder::BigEndian => bytes.iter().fold(0, fold),
            ByteOrder::LittleEndian => bytes.iter().rev().fold(0, fold),
        })
    }

    fn read_raw(&mut self, phys: PhysicalType, opts: Option<&BinaryComponent>) -> io::Result<Result<Value, String>> {
        let bit_length = opts.and_then(|o| o.bit_length);
        let value = match phys {
            PhysicalType::Bool => {
                let v = match bit_length {
                    Some(bits) => self.read_bits(bits)?,
                    None => self.read_uint(1)?,
                };
                Value::Bool(v != 0)
            }
            PhysicalType::F32 => Value::F32(f32::from_bits(self.read_uint(4)? as u32)),
            PhysicalType::F64 => Value::F64(f64::from_bits(self.read_uint(8)?)),
            PhysicalType::Ascii | PhysicalType::Utf8 => {
                let bytes = match opts.and_then(|o| o.byte_length) {
                    Some(len) => {
                        let mut bytes = self.read_bytes(len)?;
                        while bytes.last() == Some(&0) {
                            bytes.pop();
                        }
                        bytes
                    }
                    None => {
                        let len = self.read_uint(2)? as usize;
                        self.read_bytes(len)?
                    }
                };
                let Ok(s) = String::from_utf8(bytes) else {
                    return Ok(Err("invalid utf-8 string".to_string()));
                };
                if phys == PhysicalType::Ascii {
                    if !s.is_ascii() {
                        return Ok(Err("non ascii string".to_string()));
                    }
                    Value::Ascii(s)
                } else {
                    Value::Utf8(s)
                }
            }
            _ => {
                let width = phys.bit_width().unwrap_or(64);
                let (v, bits) = match bit_length {
                    Some(bits) => (self.read_bits(bits)?, bits),
                    None => (self.read_uint(width as usize / 8)?, width),
                };
                if phys.is_signed() {
                    Value::I64(sign_extend(v, bits))
                } else {
                    Value::U64(v)
                }
            }
        };
        Ok(Ok(value))
    }
}

impl AtomReader for BinaryDecoder<'_> {
    fn enter(&mut self, comp: &Component, path: &DataPath) -> Result<(), Error> {
        let layout = self.layout;
        let Some(bound) = layout.block(comp) else {
            return Ok(());
        };
        self.align();
        self.read_bytes(bound.block.padding_before)
            .map_err(|e| map_io(path, e))?;
        let payload = if bound.has_transform() {
            let len = self.read_uint(4).map_err(|e| map_io(path, e))? as usize;
            let frame_len = bound.block.byte_length.unwrap_or(len);
            if len > frame_len || len > MAX_BLOCK_LEN {
                return Err(format_error(path, format!("block payload of {len} bytes too long")));
            }
            let mut data = self.read_bytes(frame_len).map_err(|e| map_io(path, e))?;
            data.truncate(len);
            if let Some(cipher) = &bound.cipher {
                data = cipher
                    .decrypt(&data)
                    .map_err(|e| format_error(path, e.to_string()))?;
            }
            if let Some(compressor) = &bound.compressor {
                data = compressor
                    .decompress(&data)
                    .map_err(|e| format_error(path, e.to_string()))?;
            }
            Some(data)
        } else {
            match bound.block.byte_length {
                Some(len) => Some(self.read_bytes(len).map_err(|e| map_io(path, e))?),
                None => None,
            }
        };
        self.frames.push(InFrame {
            key: key(comp),
            payload: payload.map(|data| (Cursor::new(data), BitState::default())),
        });
        Ok(())
    }

    fn exit(&mut self, comp: &Component, path: &DataPath) -> Result<(), Error> {
        let layout = self.layout;
        let Some(bound) = layout.block(comp) else {
            return Ok(());
        };
        if self.frames.last().map(|f| f.key) == Some(key(comp)) {
            self.frames.pop();
        }
        self.align();
        self.read_bytes(bound.block.padding_after)
            .map_err(|e| map_io(path, e))?;
        Ok(())
    }

    fn read_atom(&mut self, comp: &Component, ty: DataType, path: &DataPath) -> Result<Value, Error> {
        let layout = self.layout;
        let opts = layout.options(comp);
        let phys = opts.map_or(PhysicalType::natural(ty), |o| o.data_type);
        let padding = opts.map_or((0, 0), |o| (o.padding_before, o.padding_after));
        self.skip_bits(padding.0).map_err(|e| map_io(path, e))?;
        let raw = self.read_raw(phys, opts).map_err(|e| map_io(path, e))?;
        self.skip_bits(padding.1).map_err(|e| map_io(path, e))?;
        let converted = raw.and_then(|v| {
            v.cast(ty)
                .ok_or_else(|| format!("{phys} value {v} does not fit {ty}"))
        });
        match converted {
            Ok(v) => Ok(v),
            Err(detail) => {
                if self.deferred.is_none() {
                    self.deferred = Some(format_error(path, detail));
                }
                Ok(ty.default_value())
            }
        }
    }

    fn read_len(&mut self, _list: &Component, path: &DataPath) -> Result<usize, Error> {
        Ok(self.read_uint(4).map_err(|e| map_io(path, e))? as usize)
    }
}

struct OutFrame {
    key: usize,
    buf: Vec<u8>,
    cur: u8,
    /// Bits already written into `cur`.
    used: u8,
}

impl OutFrame {
    fn new(key: usize) -> Self {
        OutFrame {
            key,
            buf: vec![],
            cur: 0,
            used: 0,
        }
    }

    fn write_bit(&mut self, bit: u8) {
        self.cur |= (bit & 1) << (7 - self.used);
        self.used += 1;
        if self.used == 8 {
            self.buf.push(self.cur);
            self.cur = 0;
            self.used = 0;
        }
    }

    /// Writes the low `n` bits of `v`; bits above the 64th are zero.
    fn write_bits(&mut self, v: u64, n: u32) {
        for i in (0..n).rev() {
            let bit = v.checked_shr(i).map_or(0, |b| b & 1);
            self.write_bit(bit as u8);
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        if self.used == 0 {
            self.buf.extend_from_slice(bytes);
        } else {
            for b in bytes {
                self.write_bits(*b as u64, 8);
            }
        }
    }

    fn zeros(&mut self, n: usize) {
        if self.used == 0 {
            self.buf.resize(self.buf.len() + n, 0);
        } else {
            for _ in 0..n {
                self.write_bits(0, 8);
            }
        }
    }

    fn align(&mut self) {
        if self.used > 0 {
            self.buf.push(self.cur);
            self.cur = 0;
            self.used = 0;
        }
    }
}

pub(crate) struct BinaryEncoder<'a> {
    layout: &'a BinaryLayout,
    frames: Vec<OutFrame>,
}

impl<'a> BinaryEncoder<'a> {
    pub fn new(layout: &'a BinaryLayout) -> Self {
        BinaryEncoder {
            layout,
            frames: vec![OutFrame::new(0)],
        }
    }

    /// Bytes of the record, padded to a byte boundary.
    pub fn finish(mut self) -> Vec<u8> {
        let mut root = self.frames.swap_remove(0);
        root.align();
        root.buf
    }

    fn out(&mut self) -> &mut OutFrame {
        if self.frames.is_empty() {
            self.frames.push(OutFrame::new(0));
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn write_uint(&mut self, v: u64, width: usize) {
        let bytes = v.to_be_bytes();
        let mut be = bytes[8 - width..].to_vec();
        if self.layout.byte_order == ByteOrder::LittleEndian {
            be.reverse();
        }
        self.out().write_bytes(&be);
    }

    fn write_int(&mut self, value: &Value, phys: PhysicalType, bits: Option<u32>, path: &DataPath) -> Result<(), Error> {
        let v = match value {
            Value::Bool(b) => *b as i128,
            v => v
                .as_i128()
                .or_else(|| v.cast(DataType::I64).and_then(|v| v.as_i128()))
                .or_else(|| v.cast(DataType::U64).and_then(|v| v.as_i128()))
                .ok_or_else(|| format_error(path, format!("{v} is not an integer")))?,
        };
        let width = bits.or(phys.bit_width()).unwrap_or(64);
        let (min, max) = if phys.is_signed() {
            (-(1i128 << (width - 1)), (1i128 << (width - 1)) - 1)
        } else {
            (0, (1i128 << width) - 1)
        };
        if v < min || v > max {
            return Err(format_error(
                path,
                format!("{v} does not fit {width} bit {phys}"),
            ));
        }
        let raw = (v as u128 & ((1u128 << width) - 1)) as u64;
        match bits {
            Some(bits) => self.out().write_bits(raw, bits),
            None => self.write_uint(raw, width as usize / 8),
        }
        Ok(())
    }

    fn write_string(&mut self, value: &Value, phys: PhysicalType, opts: Option<&BinaryComponent>, path: &DataPath) -> Result<(), Error> {
        let s = value
            .as_str()
            .ok_or_else(|| Error::type_mismatch("string", value.data_type()))?;
        if phys == PhysicalType::Ascii && !s.is_ascii() {
            return Err(format_error(path, "non ascii string"));
        }
        let bytes = s.as_bytes();
        match opts.and_then(|o| o.byte_length) {
            Some(len) => {
                if bytes.len() > len {
                    return Err(format_error(
                        path,
                        format!("string of {} bytes exceeds byte length {len}", bytes.len()),
                    ));
                }
                let out = self.out();
                out.write_bytes(bytes);
                out.zeros(len - bytes.len());
            }
            None => {
                let len = u16::try_from(bytes.len())
                    .map_err(|_| format_error(path, "string longer than 65535 bytes"))?;
                self.write_uint(len as u64, 2);
                self.out().write_bytes(bytes);
            }
        }
        Ok(())
    }
}

impl AtomWriter for BinaryEncoder<'_> {
    fn enter(&mut self, comp: &Component, _path: &DataPath) -> Result<(), Error> {
        let layout = self.layout;
        let Some(bound) = layout.block(comp) else {
            return Ok(());
        };
        let out = self.out();
        out.align();
        out.zeros(bound.block.padding_before);
        self.frames.push(OutFrame::new(key(comp)));
        Ok(())
    }

    fn exit(&mut self, comp: &Component, path: &DataPath) -> Result<(), Error> {
        let layout = self.layout;
        let Some(bound) = layout.block(comp) else {
            return Ok(());
        };
        if self.frames.len() < 2 || self.frames.last().map(|f| f.key) != Some(key(comp)) {
            return Err(format_error(path, "unbalanced block"));
        }
        let Some(mut frame) = self.frames.pop() else {
            return Err(format_error(path, "unbalanced block"));
        };
        frame.align();
        let mut data = frame.buf;
        if bound.has_transform() {
            if let Some(compressor) = &bound.compressor {
                data = compressor.compress(&data)?;
            }
            if let Some(cipher) = &bound.cipher {
                data = cipher.encrypt(&data)?;
            }
            let len = data.len();
            let frame_len = bound.block.byte_length.unwrap_or(len);
            if len > frame_len {
                return Err(format_error(
                    path,
                    format!("block payload of {len} bytes exceeds byte length {frame_len}"),
                ));
            }
            self.write_uint(len as u64, 4);
            let out = self.out();
            out.write_bytes(&data);
            out.zeros(frame_len - len);
        } else {
            let frame_len = bound.block.byte_length.unwrap_or(data.len());
            if data.len() > frame_len {
                return Err(format_error(
                    path,
                    format!("block of {} bytes exceeds byte length {frame_len}", data.len()),
                ));
            }
            let out = self.out();
            out.write_bytes(&data);
            out.zeros(frame_len - data.len());
        }
        self.out().zeros(bound.block.padding_after);
        Ok(())
    }

    fn write_atom(&mut self, comp: &Component, value: &Value, path: &DataPath) -> Result<(), Error> {
        let layout = self.layout;
        let opts = layout.options(comp);
        let phys = opts.map_or(PhysicalType::natural(value.data_type()), |o| o.data_type);
        let bits = opts.and_then(|o| o.bit_length);
        self.out().write_bits(0, opts.map_or(0, |o| o.padding_before));
        match phys {
            PhysicalType::Bool => {
                let b = value
                    .cast(DataType::Bool)
                    .and_then(|v| if let Value::Bool(b) = v { Some(b) } else { None })
                    .ok_or_else(|| format_error(path, format!("{value} is not a boolean")))?;
                match bits {
                    Some(bits) => self.out().write_bits(b as u64, bits),
                    None => self.write_uint(b as u64, 1),
                }
            }
            PhysicalType::F32 => {
                let f = value
                    .cast(DataType::F32)
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| format_error(path, format!("{value} is not a number")))?;
                self.write_uint((f as f32).to_bits() as u64, 4);
            }
            PhysicalType::F64 => {
                let f = value
                    .cast(DataType::F64)
                    .and_then(|v| v.as_f64())
                    .ok_or_else(|| format_error(path, format!("{value} is not a number")))?;
                self.write_uint(f.to_bits(), 8);
            }
            PhysicalType::Ascii | PhysicalType::Utf8 => self.write_string(value, phys, opts, path)?,
            _ => self.write_int(value, phys, bits, path)?,
        }
        self.out().write_bits(0, opts.map_or(0, |o| o.padding_after));
        Ok(())
    }

    fn write_len(&mut self, _list: &Component, len: usize, path: &DataPath) -> Result<(), Error> {
        let len = u32::try_from(len).map_err(|_| format_error(path, "list longer than u32::MAX"))?;
        self.write_uint(len as u64, 4);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{Decode, Encode},
        component::ElementCount,
    };

    fn schema() -> Component {
        Component::record("frame")
            .with_field(Component::scalar("flags", DataType::U32))
            .and_then(|r| r.with_field(Component::scalar("ok", DataType::Bool)))
            .and_then(|r| r.with_field(Component::scalar("temp", DataType::I32)))
            .and_then(|r| r.with_field(Component::scalar("name", DataType::Ascii)))
            .and_then(|r| {
                r.with_field(Component::array(
                    "samples",
                    Component::scalar("s", DataType::F64),
                    ElementCount::Fixed(16),
                ))
            })
            .unwrap()
    }

    fn encoding(order: ByteOrder) -> BinaryEncoding {
        BinaryEncoding::new(order, ByteEncoding::Raw)
            .with_member(
                BinaryComponent::new("flags", PhysicalType::U8)
                    .with_bit_length(3)
                    .with_padding(1, 0),
            )
            .with_member(BinaryComponent::new("ok", PhysicalType::Bool).with_bit_length(1))
            .with_member(BinaryComponent::new("frame/temp", PhysicalType::I16).with_bit_length(11))
            .with_member(BinaryComponent::new("/name", PhysicalType::Ascii).with_byte_length(6))
            .with_member(BinaryBlock::new("samples").with_compression("deflate"))
    }

    fn sample_block(schema: &Component) -> crate::DataBlock {
        let mut block = schema.create_block();
        block.set_int(0, 5).unwrap();
        block.set_bool(1, true).unwrap();
        block.set_int(2, -300).unwrap();
        block.set_string(3, "probe").unwrap();
        for i in 0..16 {
            block.set_double(4 + i, i as f64 * 0.5).unwrap();
        }
        block
    }

    fn encode(layout: &BinaryLayout, schema: &Component, block: &crate::DataBlock) -> Result<Vec<u8>, Error> {
        let mut encoder = BinaryEncoder::new(layout);
        Encode::new(&mut encoder).block(schema, block)?;
        Ok(encoder.finish())
    }

    #[test]
    fn test_bit_packed_round_trip() {
        let schema = schema();
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let layout = BinaryLayout::bind(&schema, &encoding(order), &TransformRegistry::default()).unwrap();
            let block = sample_block(&schema);
            let bytes = encode(&layout, &schema, &block).unwrap();
            // 1 + 3 + 1 + 11 bits of header, 6 string bytes, then the block frame
            assert_eq!(&bytes[2..8], b"probe\0");

            let mut input = &bytes[..];
            let mut decoder = BinaryDecoder::new(&layout, &mut input);
            let mut decoded = schema.create_block();
            Decode::new(&mut decoder, 1024).block(&schema, &mut decoded).unwrap();
            decoder.finish_record();
            assert!(decoder.take_deferred().is_none());
            assert_eq!(decoded, block);
            assert!(input.is_empty());
        }
    }

    #[test]
    fn test_header_bits() {
        let schema = Component::record("r")
            .with_field(Component::scalar("a", DataType::U32))
            .and_then(|r| r.with_field(Component::scalar("b", DataType::I32)))
            .unwrap();
        let encoding = BinaryEncoding::default()
            .with_member(BinaryComponent::new("a", PhysicalType::U8).with_bit_length(3))
            .with_member(BinaryComponent::new("b", PhysicalType::I8).with_bit_length(4).with_padding(0, 1));
        let layout = BinaryLayout::bind(&schema, &encoding, &TransformRegistry::default()).unwrap();
        let mut block = schema.create_block();
        block.set_int(0, 0b101).unwrap();
        block.set_int(1, -1).unwrap();
        assert_eq!(encode(&layout, &schema, &block).unwrap(), vec![0b1011_1110]);

        block.set_int(0, 8).unwrap();
        assert!(matches!(
            encode(&layout, &schema, &block),
            Err(Error::BinaryFormat { .. })
        ));
    }

    #[test]
    fn test_fixed_string_overflow_is_rejected() {
        let schema = schema();
        let layout = BinaryLayout::bind(&schema, &encoding(ByteOrder::BigEndian), &TransformRegistry::default()).unwrap();
        let mut block = sample_block(&schema);
        block.set_string(3, "too long").unwrap();
        let err = encode(&layout, &schema, &block).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BinaryFormat);
    }

    #[test]
    fn test_conversion_errors_are_deferred() {
        let schema = Component::record("r")
            .with_field(Component::scalar("small", DataType::U32))
            .and_then(|r| r.with_field(Component::scalar("next", DataType::U32)))
            .unwrap();
        let encoding = BinaryEncoding::default()
            .with_member(BinaryComponent::new("small", PhysicalType::I8));
        let layout = BinaryLayout::bind(&schema, &encoding, &TransformRegistry::default()).unwrap();
        let bytes = [0xFFu8, 0, 0, 0, 7];
        let mut input = &bytes[..];
        let mut decoder = BinaryDecoder::new(&layout, &mut input);
        let mut block = schema.create_block();
        Decode::new(&mut decoder, 16).block(&schema, &mut block).unwrap();
        assert!(matches!(
            decoder.take_deferred(),
            Some(Error::BinaryFormat { .. })
        ));
        assert_eq!(block.get_int(1).unwrap(), 7);
    }

    #[test]
    fn test_bind_errors() {
        let schema = schema();
        let registry = TransformRegistry::default();
        let unknown = BinaryEncoding::default().with_member(BinaryBlock::new("samples").with_compression("lz4"));
        assert!(matches!(
            BinaryLayout::bind(&schema, &unknown, &registry),
            Err(Error::InvalidEncoding(_))
        ));
        let missing = BinaryEncoding::default().with_member(BinaryComponent::new("nope", PhysicalType::U8));
        assert!(BinaryLayout::bind(&schema, &missing, &registry).is_err());
        let wrong = BinaryEncoding::default().with_member(BinaryComponent::new("name", PhysicalType::U8));
        assert!(BinaryLayout::bind(&schema, &wrong, &registry).is_err());
    }
}
