//! Block-at-a-time stream codecs.
//!
//! Both encodings share one traversal: depth-first and pre-order, record fields in declared
//! order, array elements by index, each element's subtree before the next. The traversal
//! lives here; the [`text`] and [`binary`] modules only supply the atom level reads and writes.

use core::{fmt, ops::ControlFlow};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    block::DataBlock,
    component::{Component, ComponentKind, DataPath, ElementCount, PathSegment},
    error::Error,
    resize::{CounterScopes, element_len, resize_elements},
    types::{DataType, Value},
};

pub mod binary;
mod io;
pub mod parser;
pub mod text;
pub mod transform;
pub mod writer;

pub use parser::DataStreamParser;
pub use writer::DataStreamWriter;

/// Largest element count accepted from a stream unless configured otherwise.
pub const DEFAULT_MAX_ELEMENT_COUNT: usize = 1 << 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    Unconfigured,
    /// Schema and encoding are set.
    Configured,
    /// An input or output is bound.
    Open,
    Running,
    Stopped,
    Exhausted,
    Failed,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Stopped | StreamState::Exhausted | StreamState::Failed
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Unconfigured => "unconfigured",
            StreamState::Configured => "configured",
            StreamState::Open => "open",
            StreamState::Running => "running",
            StreamState::Stopped => "stopped",
            StreamState::Exhausted => "exhausted",
            StreamState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Receives every successfully decoded block.
pub trait DataHandler: Send {
    fn on_block(&mut self, schema: &Component, block: &DataBlock);
}

impl<F> DataHandler for F
where
    F: FnMut(&Component, &DataBlock) + Send,
{
    fn on_block(&mut self, schema: &Component, block: &DataBlock) {
        (self)(schema, block)
    }
}

/// Receives the bytes each record was decoded from.
pub trait RawDataHandler: Send {
    fn on_raw_block(&mut self, bytes: &[u8]);
}

impl<F> RawDataHandler for F
where
    F: FnMut(&[u8]) + Send,
{
    fn on_raw_block(&mut self, bytes: &[u8]) {
        (self)(bytes)
    }
}

/// Receives per-record errors; returning `Break` stops the stream.
pub trait ErrorHandler: Send {
    fn on_error(&mut self, error: &Error) -> ControlFlow<()>;
}

impl<F> ErrorHandler for F
where
    F: FnMut(&Error) -> ControlFlow<()> + Send,
{
    fn on_error(&mut self, error: &Error) -> ControlFlow<()> {
        (self)(error)
    }
}

/// Cooperative stop flag, observed between records.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Atom level input of the shared traversal.
pub(crate) trait AtomReader {
    fn enter(&mut self, _comp: &Component, _path: &DataPath) -> Result<(), Error> {
        Ok(())
    }

    fn exit(&mut self, _comp: &Component, _path: &DataPath) -> Result<(), Error> {
        Ok(())
    }

    fn read_atom(&mut self, comp: &Component, ty: DataType, path: &DataPath)
    -> Result<Value, Error>;

    /// Element count written in front of a list.
    fn read_len(&mut self, list: &Component, path: &DataPath) -> Result<usize, Error>;
}

/// Atom level output of the shared traversal.
pub(crate) trait AtomWriter {
    fn enter(&mut self, _comp: &Component, _path: &DataPath) -> Result<(), Error> {
        Ok(())
    }

    fn exit(&mut self, _comp: &Component, _path: &DataPath) -> Result<(), Error> {
        Ok(())
    }

    fn write_atom(&mut self, comp: &Component, value: &Value, path: &DataPath)
    -> Result<(), Error>;

    fn write_len(&mut self, list: &Component, len: usize, path: &DataPath) -> Result<(), Error>;
}

fn shape(path: &DataPath) -> Error {
    Error::ShapeMismatch {
        path: path.to_string(),
    }
}

/// Fills a block from an [`AtomReader`], resizing variable nodes as counts are read.
pub(crate) struct Decode<'s, 'r, R: ?Sized> {
    reader: &'r mut R,
    scopes: CounterScopes<'s>,
    path: DataPath,
    max_elements: usize,
}

impl<'s, 'r, R: AtomReader + ?Sized> Decode<'s, 'r, R> {
    pub fn new(reader: &'r mut R, max_elements: usize) -> Self {
        Decode {
            reader,
            scopes: CounterScopes::default(),
            path: DataPath::root(),
            max_elements,
        }
    }

    pub fn block(&mut self, comp: &'s Component, block: &mut DataBlock) -> Result<(), Error> {
        if let Some(n) = comp.fixed_atom_count() {
            let atoms = block
                .atoms_mut()
                .filter(|a| a.len() == n)
                .ok_or_else(|| shape(&self.path))?;
            return self.flat(comp, atoms);
        }
        self.reader.enter(comp, &self.path)?;
        match &comp.kind {
            ComponentKind::Record(fields) => {
                let path = &self.path;
                let c = block
                    .composite_mut()
                    .filter(|c| c.children().len() == fields.len())
                    .ok_or_else(|| shape(path))?;
                self.scopes.enter_record();
                for (field, child) in fields.iter().zip(c.children_mut().iter_mut()) {
                    self.path.push(PathSegment::Name(field.name.clone()));
                    self.block(field, child)?;
                    self.path.pop();
                    if field.is_counter_candidate() {
                        if let Some(v) = child.atoms().and_then(|a| a.first()).and_then(Value::as_i128) {
                            self.scopes.declare(&field.name, v);
                        }
                    }
                }
                self.scopes.exit_record();
                c.refresh();
            }
            ComponentKind::Array { element, .. } => {
                let path = &self.path;
                let n = self.scopes.element_count(comp, &|| path.to_string())?;
                self.elements(element, n, block)?;
            }
            ComponentKind::List { element } => {
                let n = self.reader.read_len(comp, &self.path)?;
                self.elements(element, n, block)?;
            }
            ComponentKind::Scalar(_) | ComponentKind::Range(_) => return Err(shape(&self.path)),
        }
        self.reader.exit(comp, &self.path)
    }

    fn elements(
        &mut self,
        element: &'s Component,
        n: usize,
        block: &mut DataBlock,
    ) -> Result<(), Error> {
        if n > self.max_elements {
            return Err(Error::CountOverflow {
                path: self.path.to_string(),
                size: n,
                max: self.max_elements,
            });
        }
        resize_elements(element, block, n)?;
        match block {
            DataBlock::Atomic(atoms) => {
                let stride = element.fixed_atom_count().unwrap_or(0);
                for i in 0..n {
                    self.path.push(PathSegment::Index(i));
                    let chunk = atoms
                        .get_mut(i * stride..(i + 1) * stride)
                        .ok_or_else(|| shape(&self.path))?;
                    self.flat(element, chunk)?;
                    self.path.pop();
                }
            }
            DataBlock::Sequence(c) => {
                for (i, child) in c.children_mut().iter_mut().enumerate() {
                    self.path.push(PathSegment::Index(i));
                    self.block(element, child)?;
                    self.path.pop();
                }
                c.refresh();
            }
            DataBlock::Mixed(_) => return Err(shape(&self.path)),
        }
        Ok(())
    }

    fn flat(&mut self, comp: &'s Component, atoms: &mut [Value]) -> Result<(), Error> {
        self.reader.enter(comp, &self.path)?;
        match &comp.kind {
            ComponentKind::Scalar(ty) => {
                let slot = atoms.first_mut().ok_or_else(|| shape(&self.path))?;
                *slot = self.reader.read_atom(comp, *ty, &self.path)?;
            }
            ComponentKind::Range(ty) => {
                if atoms.len() != 2 {
                    return Err(shape(&self.path));
                }
                for slot in atoms.iter_mut() {
                    *slot = self.reader.read_atom(comp, *ty, &self.path)?;
                }
            }
            ComponentKind::Record(fields) => {
                let mut offset = 0;
                for field in fields {
                    let k = field.fixed_atom_count().unwrap_or(0);
                    self.path.push(PathSegment::Name(field.name.clone()));
                    let chunk = atoms
                        .get_mut(offset..offset + k)
                        .ok_or_else(|| shape(&self.path))?;
                    self.flat(field, chunk)?;
                    self.path.pop();
                    offset += k;
                }
            }
            ComponentKind::Array {
                element,
                count: ElementCount::Fixed(n),
            } => {
                let stride = element.fixed_atom_count().unwrap_or(0);
                for i in 0..*n {
                    self.path.push(PathSegment::Index(i));
                    let chunk = atoms
                        .get_mut(i * stride..(i + 1) * stride)
                        .ok_or_else(|| shape(&self.path))?;
                    self.flat(element, chunk)?;
                    self.path.pop();
                }
            }
            _ => return Err(shape(&self.path)),
        }
        self.reader.exit(comp, &self.path)
    }
}

/// Feeds a block to an [`AtomWriter`], checking counters against element counts.
pub(crate) struct Encode<'s, 'w, W: ?Sized> {
    writer: &'w mut W,
    scopes: CounterScopes<'s>,
    path: DataPath,
}

impl<'s, 'w, W: AtomWriter + ?Sized> Encode<'s, 'w, W> {
    pub fn new(writer: &'w mut W) -> Self {
        Encode {
            writer,
            scopes: CounterScopes::default(),
            path: DataPath::root(),
        }
    }

    pub fn block(&mut self, comp: &'s Component, block: &DataBlock) -> Result<(), Error> {
        if let Some(n) = comp.fixed_atom_count() {
            let atoms = block
                .atoms()
                .filter(|a| a.len() == n)
                .ok_or_else(|| shape(&self.path))?;
            return self.flat(comp, atoms);
        }
        self.writer.enter(comp, &self.path)?;
        match &comp.kind {
            ComponentKind::Record(fields) => {
                let c = block
                    .composite()
                    .filter(|_| matches!(block, DataBlock::Mixed(_)))
                    .filter(|c| c.children().len() == fields.len())
                    .ok_or_else(|| shape(&self.path))?;
                self.scopes.enter_record();
                for (field, child) in fields.iter().zip(c.children()) {
                    self.path.push(PathSegment::Name(field.name.clone()));
                    self.block(field, child)?;
                    self.path.pop();
                    if field.is_counter_candidate() {
                        if let Some(v) = child.atoms().and_then(|a| a.first()).and_then(Value::as_i128) {
                            self.scopes.declare(&field.name, v);
                        }
                    }
                }
                self.scopes.exit_record();
            }
            ComponentKind::Array { element, count } => {
                let actual = element_len(element, block).ok_or_else(|| shape(&self.path))?;
                let path = &self.path;
                let expected = self.scopes.element_count(comp, &|| path.to_string())?;
                if actual != expected {
                    return Err(match count {
                        ElementCount::Ref(_) => Error::CountMismatch {
                            path: self.path.to_string(),
                            counter: i64::try_from(expected).unwrap_or(i64::MAX),
                            actual,
                        },
                        ElementCount::Fixed(_) => shape(&self.path),
                    });
                }
                self.elements(element, block)?;
            }
            ComponentKind::List { element } => {
                let len = element_len(element, block).ok_or_else(|| shape(&self.path))?;
                self.writer.write_len(comp, len, &self.path)?;
                self.elements(element, block)?;
            }
            ComponentKind::Scalar(_) | ComponentKind::Range(_) => return Err(shape(&self.path)),
        }
        self.writer.exit(comp, &self.path)
    }

    fn elements(&mut self, element: &'s Component, block: &DataBlock) -> Result<(), Error> {
        match block {
            DataBlock::Atomic(atoms) => {
                let stride = element
                    .fixed_atom_count()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| shape(&self.path))?;
                for (i, chunk) in atoms.chunks(stride).enumerate() {
                    self.path.push(PathSegment::Index(i));
                    self.flat(element, chunk)?;
                    self.path.pop();
                }
            }
            DataBlock::Sequence(c) => {
                for (i, child) in c.children().iter().enumerate() {
                    self.path.push(PathSegment::Index(i));
                    self.block(element, child)?;
                    self.path.pop();
                }
            }
            DataBlock::Mixed(_) => return Err(shape(&self.path)),
        }
        Ok(())
    }

    fn flat(&mut self, comp: &'s Component, atoms: &[Value]) -> Result<(), Error> {
        self.writer.enter(comp, &self.path)?;
        match &comp.kind {
            ComponentKind::Scalar(ty) | ComponentKind::Range(ty) => {
                let n = if matches!(comp.kind, ComponentKind::Range(_)) { 2 } else { 1 };
                if atoms.len() != n {
                    return Err(shape(&self.path));
                }
                for atom in atoms {
                    if atom.data_type() != *ty {
                        return Err(Error::type_mismatch(ty.as_str(), atom.data_type()));
                    }
                    self.writer.write_atom(comp, atom, &self.path)?;
                }
            }
            ComponentKind::Record(fields) => {
                let mut offset = 0;
                for field in fields {
                    let k = field.fixed_atom_count().unwrap_or(0);
                    self.path.push(PathSegment::Name(field.name.clone()));
                    let chunk = atoms
                        .get(offset..offset + k)
                        .ok_or_else(|| shape(&self.path))?;
                    self.flat(field, chunk)?;
                    self.path.pop();
                    offset += k;
                }
            }
            ComponentKind::Array {
                element,
                count: ElementCount::Fixed(n),
            } => {
                let stride = element.fixed_atom_count().unwrap_or(0);
                for i in 0..*n {
                    self.path.push(PathSegment::Index(i));
                    let chunk = atoms
                        .get(i * stride..(i + 1) * stride)
                        .ok_or_else(|| shape(&self.path))?;
                    self.flat(element, chunk)?;
                    self.path.pop();
                }
            }
            _ => return Err(shape(&self.path)),
        }
        self.writer.exit(comp, &self.path)
    }
}
