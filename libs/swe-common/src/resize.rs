//! Growing and shrinking variable-size arrays and lists.
//!
//! Resizing touches exactly one node: existing elements keep their own nested sizes, new
//! elements start from the element's default block, and dropped elements are discarded
//! entirely (regrowing never resurrects old values). Cached atom counts and offsets are then
//! refreshed on every composite between the root and the resized node.

use tracing::trace;

use crate::{
    block::{DataBlock, locate, modify_at},
    component::{Component, ComponentKind, DataPath, ElementCount, PathSegment},
    error::Error,
    types::Value,
};

/// Integer scalars visible to counted arrays, one frame per enclosing record.
#[derive(Default)]
pub(crate) struct CounterScopes<'s> {
    values: Vec<(&'s str, i128)>,
    frames: Vec<usize>,
}

impl<'s> CounterScopes<'s> {
    pub fn enter_record(&mut self) {
        self.frames.push(self.values.len());
    }

    pub fn exit_record(&mut self) {
        if let Some(len) = self.frames.pop() {
            self.values.truncate(len);
        }
    }

    pub fn declare(&mut self, name: &'s str, value: i128) {
        self.values.push((name, value));
    }

    pub fn lookup(&self, name: &str) -> Option<i128> {
        self.values
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    /// Element count of `array`, from its fixed count or the visible counter.
    pub fn element_count(&self, array: &Component, path: &dyn Fn() -> String) -> Result<usize, Error> {
        match &array.kind {
            ComponentKind::Array {
                count: ElementCount::Fixed(n),
                ..
            } => Ok(*n),
            ComponentKind::Array {
                count: ElementCount::Ref(counter),
                ..
            } => {
                let value = self.lookup(counter).ok_or_else(|| Error::UnresolvedCount {
                    array: path(),
                    counter: counter.clone(),
                })?;
                usize::try_from(value).map_err(|_| Error::NegativeSize {
                    path: path(),
                    size: i64::try_from(value).unwrap_or(i64::MIN),
                })
            }
            _ => Err(Error::invalid_path(path(), "not an array")),
        }
    }
}

/// Current element count of a variable node's own block.
pub(crate) fn element_len(element: &Component, block: &DataBlock) -> Option<usize> {
    match block {
        DataBlock::Atomic(atoms) => {
            let stride = element.fixed_atom_count().filter(|s| *s > 0)?;
            Some(atoms.len() / stride)
        }
        DataBlock::Sequence(c) => Some(c.children().len()),
        DataBlock::Mixed(_) => None,
    }
}

/// Sets the element count of the block owned by an array or list.
pub(crate) fn resize_elements(
    element: &Component,
    block: &mut DataBlock,
    size: usize,
) -> Result<(), Error> {
    match block {
        DataBlock::Atomic(atoms) => {
            let stride = element.fixed_atom_count().unwrap_or(0);
            let target = size * stride;
            if atoms.len() > target {
                atoms.truncate(target);
            }
            while atoms.len() < target {
                element.push_default_atoms(atoms);
            }
        }
        DataBlock::Sequence(c) => {
            let children = c.children_mut();
            children.truncate(size);
            while children.len() < size {
                children.push(element.create_block());
            }
            c.refresh();
        }
        DataBlock::Mixed(_) => {
            return Err(Error::ShapeMismatch {
                path: element.name.clone(),
            });
        }
    }
    Ok(())
}

/// Counted arrays inside `block`, a block for the node `comp` at `path`, with the element
/// count each one holds.
///
/// Arrays sharing a counter must agree on their count.
pub(crate) fn implied_counts(
    schema: &Component,
    comp: &Component,
    path: &DataPath,
    block: &DataBlock,
) -> Result<Vec<(DataPath, usize)>, Error> {
    let mut arrays = vec![];
    counted_arrays(comp, block, &mut path.clone(), &mut arrays);
    let mut counters: Vec<(DataPath, usize)> = vec![];
    for (array, count) in &arrays {
        let counter = schema.count_reference(array)?;
        match counters.iter().find(|(c, _)| *c == counter) {
            Some((_, seen)) if seen != count => {
                return Err(Error::ShapeMismatch {
                    path: array.to_string(),
                });
            }
            Some(_) => {}
            None => counters.push((counter, *count)),
        }
    }
    Ok(arrays)
}

fn counted_arrays(
    comp: &Component,
    block: &DataBlock,
    path: &mut DataPath,
    out: &mut Vec<(DataPath, usize)>,
) {
    if !comp.is_variable() {
        return;
    }
    match &comp.kind {
        ComponentKind::Record(fields) => {
            let Some(c) = block.composite() else {
                return;
            };
            for (field, child) in fields.iter().zip(c.children()) {
                path.push(PathSegment::Name(field.name.clone()));
                counted_arrays(field, child, path, out);
                path.pop();
            }
        }
        ComponentKind::Array { element, count } => {
            if let (ElementCount::Ref(_), Some(len)) = (count, element_len(element, block)) {
                out.push((path.clone(), len));
            }
            counted_elements(element, block, path, out);
        }
        ComponentKind::List { element } => counted_elements(element, block, path, out),
        ComponentKind::Scalar(_) | ComponentKind::Range(_) => {}
    }
}

fn counted_elements(
    element: &Component,
    block: &DataBlock,
    path: &mut DataPath,
    out: &mut Vec<(DataPath, usize)>,
) {
    if let DataBlock::Sequence(c) = block {
        for (i, child) in c.children().iter().enumerate() {
            path.push(PathSegment::Index(i));
            counted_arrays(element, child, path, out);
            path.pop();
        }
    }
}

impl DataBlock {
    /// Resizes the variable array or list at `path` to `size` elements.
    ///
    /// Counted arrays also store `size` into their counter, and every other array driven by
    /// that counter follows. Fixed arrays cannot be resized and lists cannot shrink.
    pub fn update_size(
        &mut self,
        schema: &Component,
        path: &DataPath,
        size: usize,
    ) -> Result<(), Error> {
        let loc = locate(schema, self, path)?;
        let (element, counted) = match &loc.comp.kind {
            ComponentKind::Array {
                count: ElementCount::Fixed(_),
                ..
            } => {
                return Err(Error::FixedSize {
                    path: path.to_string(),
                });
            }
            ComponentKind::Array {
                element,
                count: ElementCount::Ref(_),
            } => (&**element, true),
            ComponentKind::List { element } => {
                let current = self.component_count(schema, path)?;
                if size < current {
                    return Err(Error::ShrinkBelowMinimum {
                        path: path.to_string(),
                        size,
                        min: current,
                    });
                }
                (&**element, false)
            }
            _ => return Err(Error::invalid_path(path.to_string(), "not an array or list")),
        };
        if counted {
            self.check_counter_range(schema, path, size)?;
        }
        if loc.inline.is_some() {
            return Err(Error::ShapeMismatch {
                path: path.to_string(),
            });
        }
        modify_at(self, &loc.chain, |target| {
            resize_elements(element, target, size)
        })?;
        if counted {
            self.write_counter(schema, path, size)?;
            self.apply_counts(schema)?;
        }
        trace!(%path, size, atoms = self.atom_count(), "resized");
        Ok(())
    }

    pub(crate) fn check_counter_range(
        &self,
        schema: &Component,
        array: &DataPath,
        size: usize,
    ) -> Result<(), Error> {
        let counter = schema.count_reference(array)?;
        let ty = schema
            .component_at(&counter)?
            .data_type()
            .ok_or_else(|| Error::invalid_path(counter.to_string(), "not a scalar"))?;
        let max = ty.max_count().unwrap_or(0);
        if size as u64 > max {
            return Err(Error::CountOverflow {
                path: array.to_string(),
                size,
                max: usize::try_from(max).unwrap_or(usize::MAX),
            });
        }
        Ok(())
    }

    /// Stores `count` into the counter driving the array at `array`.
    pub(crate) fn write_counter(
        &mut self,
        schema: &Component,
        array: &DataPath,
        count: usize,
    ) -> Result<(), Error> {
        self.check_counter_range(schema, array, count)?;
        let counter = schema.count_reference(array)?;
        let ty = schema
            .component_at(&counter)?
            .data_type()
            .ok_or_else(|| Error::invalid_path(counter.to_string(), "not a scalar"))?;
        let value = Value::from_int(ty, count as i128).ok_or_else(|| Error::CountOverflow {
            path: array.to_string(),
            size: count,
            max: usize::MAX,
        })?;
        self.set_value_at(schema, &counter, value)
    }

    /// Resizes every counted array whose counter disagrees with its element count.
    ///
    /// This is the only way a counter written directly with a setter changes the shape of
    /// its array.
    pub fn apply_counts(&mut self, schema: &Component) -> Result<(), Error> {
        let mut scopes = CounterScopes::default();
        let mut path = DataPath::root();
        apply_counts(schema, self, &mut scopes, &mut path)
    }
}

fn apply_counts<'s>(
    comp: &'s Component,
    block: &mut DataBlock,
    scopes: &mut CounterScopes<'s>,
    path: &mut DataPath,
) -> Result<(), Error> {
    if !comp.is_variable() {
        return Ok(());
    }
    match &comp.kind {
        ComponentKind::Record(fields) => {
            let c = block.composite_mut().ok_or_else(|| Error::ShapeMismatch {
                path: path.to_string(),
            })?;
            scopes.enter_record();
            for (field, child) in fields.iter().zip(c.children_mut().iter_mut()) {
                path.push(PathSegment::Name(field.name.clone()));
                apply_counts(field, child, scopes, path)?;
                path.pop();
                if field.is_counter_candidate() {
                    if let Some(v) = child.atoms().and_then(|a| a.first()).and_then(Value::as_i128) {
                        scopes.declare(&field.name, v);
                    }
                }
            }
            scopes.exit_record();
            c.refresh();
        }
        ComponentKind::Array { element, count } => {
            if let ElementCount::Ref(_) = count {
                let size = scopes.element_count(comp, &|| path.to_string())?;
                if element_len(element, block) != Some(size) {
                    trace!(%path, size, "applying counter");
                    resize_elements(element, block, size)?;
                }
            }
            apply_elements(element, block, scopes, path)?;
        }
        ComponentKind::List { element } => apply_elements(element, block, scopes, path)?,
        ComponentKind::Scalar(_) | ComponentKind::Range(_) => {}
    }
    Ok(())
}

fn apply_elements<'s>(
    element: &'s Component,
    block: &mut DataBlock,
    scopes: &mut CounterScopes<'s>,
    path: &mut DataPath,
) -> Result<(), Error> {
    if let DataBlock::Sequence(c) = block {
        for (i, child) in c.children_mut().iter_mut().enumerate() {
            path.push(PathSegment::Index(i));
            apply_counts(element, child, scopes, path)?;
            path.pop();
        }
        c.refresh();
    }
    Ok(())
}
