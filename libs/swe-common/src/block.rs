//! Physical storage for one record instance.
//!
//! A [`DataBlock`] mirrors the shape of its [`Component`]: fixed-size subtrees are packed into
//! one flat vector of atoms, while variable-size subtrees get a [`CompositeBlock`] with one
//! child per field or element. Composite blocks cache their total atom count and the atom
//! offset of each child, so a flat atom index can be mapped to its leaf in `O(depth * log n)`.

use serde::{Deserialize, Serialize};

use crate::{
    component::{Component, ComponentKind, DataPath, ElementCount, Layout, PathSegment},
    error::Error,
    resize::implied_counts,
    types::{DataType, Value},
};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum DataBlock {
    Atomic(Vec<Value>),
    /// One child per record field.
    Mixed(CompositeBlock),
    /// One child per array or list element.
    Sequence(CompositeBlock),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CompositeBlock {
    children: Vec<DataBlock>,
    offsets: Vec<usize>,
    atom_count: usize,
}

impl CompositeBlock {
    pub fn new(children: Vec<DataBlock>) -> Self {
        let mut block = CompositeBlock {
            children,
            offsets: vec![],
            atom_count: 0,
        };
        block.refresh();
        block
    }

    pub fn children(&self) -> &[DataBlock] {
        &self.children
    }

    /// Atom offset of each child inside this block.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn atom_count(&self) -> usize {
        self.atom_count
    }

    /// Callers must [`CompositeBlock::refresh`] after changing the children.
    pub(crate) fn children_mut(&mut self) -> &mut Vec<DataBlock> {
        &mut self.children
    }

    /// Rebuilds offsets and the total from the children's cached counts.
    pub(crate) fn refresh(&mut self) {
        self.offsets.clear();
        let mut total = 0;
        for child in &self.children {
            self.offsets.push(total);
            total += child.atom_count();
        }
        self.atom_count = total;
    }

    /// Child holding atom `index` and the atom's index inside that child.
    fn find(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.atom_count {
            return None;
        }
        let child = self.offsets.partition_point(|&o| o <= index).checked_sub(1)?;
        Some((child, index - self.offsets[child]))
    }
}

impl Component {
    /// Default block for this component: fixed arrays are fully allocated with zero atoms,
    /// variable arrays and lists start empty.
    pub fn create_block(&self) -> DataBlock {
        match self.layout() {
            Layout::Flat(n) => {
                let mut atoms = Vec::with_capacity(n);
                self.push_default_atoms(&mut atoms);
                DataBlock::Atomic(atoms)
            }
            Layout::VarAtomic { .. } => DataBlock::Atomic(vec![]),
            Layout::Mixed => DataBlock::Mixed(CompositeBlock::new(
                self.fields().iter().map(Component::create_block).collect(),
            )),
            Layout::Sequence => {
                let children = match &self.kind {
                    ComponentKind::Array {
                        element,
                        count: ElementCount::Fixed(n),
                    } => (0..*n).map(|_| element.create_block()).collect(),
                    _ => vec![],
                };
                DataBlock::Sequence(CompositeBlock::new(children))
            }
        }
    }

    pub(crate) fn push_default_atoms(&self, atoms: &mut Vec<Value>) {
        match &self.kind {
            ComponentKind::Scalar(ty) => atoms.push(ty.default_value()),
            ComponentKind::Range(ty) => {
                atoms.push(ty.default_value());
                atoms.push(ty.default_value());
            }
            ComponentKind::Record(fields) => {
                for field in fields {
                    field.push_default_atoms(atoms);
                }
            }
            ComponentKind::Array {
                element,
                count: ElementCount::Fixed(n),
            } => {
                for _ in 0..*n {
                    element.push_default_atoms(atoms);
                }
            }
            ComponentKind::Array { .. } | ComponentKind::List { .. } => {}
        }
    }
}

/// Where a data path lands inside a block tree.
pub(crate) struct Location<'c> {
    pub comp: &'c Component,
    /// Child indices leading from the root block to the block holding the target.
    pub chain: Vec<usize>,
    /// Atom offset inside that block when the target is stored inline in it.
    pub inline: Option<usize>,
    pub atom_index: usize,
}

pub(crate) fn locate<'c>(
    schema: &'c Component,
    block: &DataBlock,
    path: &DataPath,
) -> Result<Location<'c>, Error> {
    let bad = |reason: String| Error::invalid_path(path.to_string(), reason);
    let shape = || Error::ShapeMismatch {
        path: path.to_string(),
    };
    let mut comp = schema;
    let mut cur = block;
    let mut chain = vec![];
    let mut inline: Option<usize> = None;
    let mut base = 0;
    for segment in path.segments() {
        match (&comp.kind, segment) {
            (ComponentKind::Record(fields), PathSegment::Name(name)) => {
                let idx = fields
                    .iter()
                    .position(|f| &f.name == name)
                    .ok_or_else(|| bad(format!("no field `{name}`")))?;
                let prefix = || -> usize {
                    fields[..idx]
                        .iter()
                        .map(|f| f.fixed_atom_count().unwrap_or(0))
                        .sum()
                };
                match (inline, cur) {
                    (Some(off), _) => inline = Some(off + prefix()),
                    (None, DataBlock::Atomic(_)) => inline = Some(prefix()),
                    (None, DataBlock::Mixed(c)) => {
                        cur = c.children.get(idx).ok_or_else(shape)?;
                        base += c.offsets[idx];
                        chain.push(idx);
                    }
                    (None, DataBlock::Sequence(_)) => return Err(shape()),
                }
                comp = &fields[idx];
            }
            (
                ComponentKind::Array { element, .. } | ComponentKind::List { element },
                PathSegment::Index(i),
            ) => {
                let i = *i;
                let stride = element.fixed_atom_count();
                match (inline, cur) {
                    (Some(off), _) => {
                        let ComponentKind::Array {
                            count: ElementCount::Fixed(n),
                            ..
                        } = comp.kind
                        else {
                            return Err(shape());
                        };
                        if i >= n {
                            return Err(bad(format!("index {i} out of bounds for {n} elements")));
                        }
                        inline = Some(off + i * stride.ok_or_else(shape)?);
                    }
                    (None, DataBlock::Atomic(atoms)) => {
                        let stride = stride.filter(|s| *s > 0).ok_or_else(shape)?;
                        let len = atoms.len() / stride;
                        if i >= len {
                            return Err(bad(format!("index {i} out of bounds for {len} elements")));
                        }
                        inline = Some(i * stride);
                    }
                    (None, DataBlock::Sequence(c)) => {
                        let len = c.children.len();
                        cur = c.children.get(i).ok_or_else(|| {
                            bad(format!("index {i} out of bounds for {len} elements"))
                        })?;
                        base += c.offsets[i];
                        chain.push(i);
                    }
                    (None, DataBlock::Mixed(_)) => return Err(shape()),
                }
                comp = &**element;
            }
            _ => return Err(bad(format!("cannot descend into `{}` with `{segment}`", comp.name))),
        }
    }
    Ok(Location {
        comp,
        chain,
        inline,
        atom_index: base + inline.unwrap_or(0),
    })
}

/// Runs `f` on the block at `chain`, refreshing cached counts on the way back up.
pub(crate) fn modify_at<R>(
    block: &mut DataBlock,
    chain: &[usize],
    f: impl FnOnce(&mut DataBlock) -> Result<R, Error>,
) -> Result<R, Error> {
    let Some((&idx, rest)) = chain.split_first() else {
        return f(block);
    };
    let composite = match block {
        DataBlock::Mixed(c) | DataBlock::Sequence(c) => c,
        DataBlock::Atomic(_) => return Err(Error::invalid_path(format!("{idx}"), "not composite")),
    };
    let child = composite
        .children
        .get_mut(idx)
        .ok_or_else(|| Error::invalid_path(format!("{idx}"), "no such child"))?;
    let res = modify_at(child, rest, f);
    composite.refresh();
    res
}

fn block_at<'b>(block: &'b DataBlock, chain: &[usize]) -> Option<&'b DataBlock> {
    let mut cur = block;
    for &idx in chain {
        cur = match cur {
            DataBlock::Mixed(c) | DataBlock::Sequence(c) => c.children.get(idx)?,
            DataBlock::Atomic(_) => return None,
        };
    }
    Some(cur)
}

fn block_at_mut<'b>(block: &'b mut DataBlock, chain: &[usize]) -> Option<&'b mut DataBlock> {
    let Some((&idx, rest)) = chain.split_first() else {
        return Some(block);
    };
    match block {
        DataBlock::Mixed(c) | DataBlock::Sequence(c) => block_at_mut(c.children.get_mut(idx)?, rest),
        DataBlock::Atomic(_) => None,
    }
}

fn atom_mut(block: &mut DataBlock, index: usize) -> Option<&mut Value> {
    match block {
        DataBlock::Atomic(atoms) => atoms.get_mut(index),
        DataBlock::Mixed(c) | DataBlock::Sequence(c) => {
            let (child, local) = c.find(index)?;
            atom_mut(&mut c.children[child], local)
        }
    }
}

impl DataBlock {
    pub fn atom_count(&self) -> usize {
        match self {
            DataBlock::Atomic(atoms) => atoms.len(),
            DataBlock::Mixed(c) | DataBlock::Sequence(c) => c.atom_count,
        }
    }

    pub fn atoms(&self) -> Option<&[Value]> {
        match self {
            DataBlock::Atomic(atoms) => Some(atoms),
            _ => None,
        }
    }

    pub fn atoms_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            DataBlock::Atomic(atoms) => Some(atoms),
            _ => None,
        }
    }

    pub fn composite(&self) -> Option<&CompositeBlock> {
        match self {
            DataBlock::Mixed(c) | DataBlock::Sequence(c) => Some(c),
            DataBlock::Atomic(_) => None,
        }
    }

    pub(crate) fn composite_mut(&mut self) -> Option<&mut CompositeBlock> {
        match self {
            DataBlock::Mixed(c) | DataBlock::Sequence(c) => Some(c),
            DataBlock::Atomic(_) => None,
        }
    }

    /// Entries of a list or of an array of variable-size elements.
    pub fn elements(&self) -> &[DataBlock] {
        match self {
            DataBlock::Sequence(c) => &c.children,
            _ => &[],
        }
    }

    /// Re-derives every cached count and offset from the leaves up.
    pub fn recompute(&mut self) {
        if let DataBlock::Mixed(c) | DataBlock::Sequence(c) = self {
            for child in &mut c.children {
                child.recompute();
            }
            c.refresh();
        }
    }

    /// Checks that this block has the shape and atom types `comp` requires.
    pub fn conforms_to(&self, comp: &Component) -> bool {
        match (comp.layout(), self) {
            (Layout::Flat(n), DataBlock::Atomic(atoms)) => {
                atoms.len() == n && atoms_match(comp, atoms)
            }
            (Layout::VarAtomic { stride }, DataBlock::Atomic(atoms)) => {
                let Some(element) = comp.element() else {
                    return false;
                };
                atoms.len() % stride == 0
                    && atoms.chunks(stride).all(|chunk| atoms_match(element, chunk))
            }
            (Layout::Mixed, DataBlock::Mixed(c)) => {
                let fields = comp.fields();
                c.children.len() == fields.len()
                    && fields.iter().zip(&c.children).all(|(f, b)| b.conforms_to(f))
            }
            (Layout::Sequence, DataBlock::Sequence(c)) => {
                let Some(element) = comp.element() else {
                    return false;
                };
                if let ComponentKind::Array {
                    count: ElementCount::Fixed(n),
                    ..
                } = comp.kind
                {
                    if c.children.len() != n {
                        return false;
                    }
                }
                c.children.iter().all(|b| b.conforms_to(element))
            }
            _ => false,
        }
    }

    /// Atom at a flattened index.
    pub fn value(&self, index: usize) -> Result<&Value, Error> {
        let count = self.atom_count();
        let oob = || Error::AtomOutOfBounds { index, count };
        let mut cur = self;
        let mut local = index;
        loop {
            match cur {
                DataBlock::Atomic(atoms) => return atoms.get(local).ok_or_else(oob),
                DataBlock::Mixed(c) | DataBlock::Sequence(c) => {
                    let (child, i) = c.find(local).ok_or_else(oob)?;
                    cur = &c.children[child];
                    local = i;
                }
            }
        }
    }

    fn value_mut(&mut self, index: usize) -> Result<&mut Value, Error> {
        let count = self.atom_count();
        atom_mut(self, index).ok_or(Error::AtomOutOfBounds { index, count })
    }

    /// Replaces the atom at `index`; the new value must have the atom's datatype.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<(), Error> {
        let atom = self.value_mut(index)?;
        if atom.data_type() != value.data_type() {
            return Err(Error::type_mismatch(
                atom.data_type().as_str(),
                value.data_type(),
            ));
        }
        *atom = value;
        Ok(())
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, Error> {
        match self.value(index)? {
            Value::Bool(b) => Ok(*b),
            v => Err(Error::type_mismatch("bool", v.data_type())),
        }
    }

    pub fn get_int(&self, index: usize) -> Result<i64, Error> {
        let value = self.value(index)?;
        value
            .as_i128()
            .and_then(|v| i64::try_from(v).ok())
            .ok_or_else(|| Error::type_mismatch("integer", value.data_type()))
    }

    pub fn get_double(&self, index: usize) -> Result<f64, Error> {
        let value = self.value(index)?;
        value
            .as_f64()
            .ok_or_else(|| Error::type_mismatch("float", value.data_type()))
    }

    pub fn get_string(&self, index: usize) -> Result<&str, Error> {
        let value = self.value(index)?;
        value
            .as_str()
            .ok_or_else(|| Error::type_mismatch("string", value.data_type()))
    }

    pub fn set_bool(&mut self, index: usize, v: bool) -> Result<(), Error> {
        self.set_value(index, Value::Bool(v))
    }

    /// Stores `v` into an integer atom of any width, failing if it does not fit.
    pub fn set_int(&mut self, index: usize, v: i64) -> Result<(), Error> {
        let atom = self.value_mut(index)?;
        let ty = atom.data_type();
        if !ty.is_integer() {
            return Err(Error::type_mismatch("integer", ty));
        }
        *atom = Value::from_int(ty, v as i128)
            .ok_or_else(|| Error::type_mismatch(format!("{v} to fit in {ty}"), DataType::I64))?;
        Ok(())
    }

    pub fn set_double(&mut self, index: usize, v: f64) -> Result<(), Error> {
        let atom = self.value_mut(index)?;
        *atom = match atom.data_type() {
            DataType::F32 => Value::F32(v as f32),
            DataType::F64 => Value::F64(v),
            ty => return Err(Error::type_mismatch("float", ty)),
        };
        Ok(())
    }

    pub fn set_string(&mut self, index: usize, v: impl Into<String>) -> Result<(), Error> {
        let v = v.into();
        let atom = self.value_mut(index)?;
        *atom = match atom.data_type() {
            DataType::Ascii if v.is_ascii() => Value::Ascii(v),
            DataType::Utf8 => Value::Utf8(v),
            ty => return Err(Error::type_mismatch("string", ty)),
        };
        Ok(())
    }

    /// Flattened index of the first atom of the node at `path`.
    pub fn atom_index(&self, schema: &Component, path: &DataPath) -> Result<usize, Error> {
        Ok(locate(schema, self, path)?.atom_index)
    }

    /// Value of the scalar at `path`.
    pub fn value_at(&self, schema: &Component, path: &DataPath) -> Result<&Value, Error> {
        let loc = locate(schema, self, path)?;
        if !matches!(loc.comp.kind, ComponentKind::Scalar(_)) {
            return Err(Error::invalid_path(path.to_string(), "not a scalar"));
        }
        block_at(self, &loc.chain)
            .and_then(DataBlock::atoms)
            .and_then(|atoms| atoms.get(loc.inline.unwrap_or(0)))
            .ok_or_else(|| Error::ShapeMismatch {
                path: path.to_string(),
            })
    }

    pub fn set_value_at(
        &mut self,
        schema: &Component,
        path: &DataPath,
        value: Value,
    ) -> Result<(), Error> {
        let loc = locate(schema, self, path)?;
        let ComponentKind::Scalar(ty) = loc.comp.kind else {
            return Err(Error::invalid_path(path.to_string(), "not a scalar"));
        };
        if value.data_type() != ty {
            return Err(Error::type_mismatch(ty.as_str(), value.data_type()));
        }
        let atom = block_at_mut(self, &loc.chain)
            .and_then(DataBlock::atoms_mut)
            .and_then(|atoms| atoms.get_mut(loc.inline.unwrap_or(0)))
            .ok_or_else(|| Error::ShapeMismatch {
                path: path.to_string(),
            })?;
        *atom = value;
        Ok(())
    }

    /// Block owned by the node at `path`. Fixed-size nodes nested in another fixed-size node
    /// have no block of their own; address their atoms with [`DataBlock::atom_index`].
    pub fn sub_block(&self, schema: &Component, path: &DataPath) -> Result<&DataBlock, Error> {
        let loc = locate(schema, self, path)?;
        if loc.inline.is_some() {
            return Err(Error::invalid_path(
                path.to_string(),
                "stored inline in its parent block",
            ));
        }
        block_at(self, &loc.chain).ok_or_else(|| Error::ShapeMismatch {
            path: path.to_string(),
        })
    }

    /// Element count of the array or list at `path`, read from the block's shape.
    pub fn component_count(&self, schema: &Component, path: &DataPath) -> Result<usize, Error> {
        let loc = locate(schema, self, path)?;
        let shape = || Error::ShapeMismatch {
            path: path.to_string(),
        };
        let element = loc
            .comp
            .element()
            .ok_or_else(|| Error::invalid_path(path.to_string(), "not an array or list"))?;
        if loc.inline.is_some() {
            return match loc.comp.kind {
                ComponentKind::Array {
                    count: ElementCount::Fixed(n),
                    ..
                } => Ok(n),
                _ => Err(shape()),
            };
        }
        match block_at(self, &loc.chain).ok_or_else(shape)? {
            DataBlock::Atomic(atoms) => match element.fixed_atom_count() {
                Some(stride) if stride > 0 => Ok(atoms.len() / stride),
                _ => match loc.comp.kind {
                    ComponentKind::Array {
                        count: ElementCount::Fixed(n),
                        ..
                    } => Ok(n),
                    _ => Err(shape()),
                },
            },
            DataBlock::Sequence(c) => Ok(c.children.len()),
            DataBlock::Mixed(_) => Err(shape()),
        }
    }

    /// Substitutes the node at `path` with `block`, then re-derives the cached counts along
    /// the path.
    ///
    /// Every counted array inside the substituted block writes its element count into its
    /// counter, wherever that counter lives, and arrays sharing a counter outside the block
    /// follow. A block whose arrays disagree on a shared counter is rejected untouched.
    pub fn set_block(
        &mut self,
        schema: &Component,
        path: &DataPath,
        block: DataBlock,
    ) -> Result<(), Error> {
        let loc = locate(schema, self, path)?;
        if !block.conforms_to(loc.comp) {
            return Err(Error::ShapeMismatch {
                path: path.to_string(),
            });
        }
        let counts = implied_counts(schema, loc.comp, path, &block)?;
        for (array, count) in &counts {
            self.check_counter_range(schema, array, *count)?;
        }
        match loc.inline {
            Some(off) => {
                let DataBlock::Atomic(new) = block else {
                    return Err(Error::ShapeMismatch {
                        path: path.to_string(),
                    });
                };
                let atoms = block_at_mut(self, &loc.chain)
                    .and_then(DataBlock::atoms_mut)
                    .and_then(|atoms| atoms.get_mut(off..off + new.len()))
                    .ok_or_else(|| Error::ShapeMismatch {
                        path: path.to_string(),
                    })?;
                for (dst, src) in atoms.iter_mut().zip(new) {
                    *dst = src;
                }
            }
            None => {
                modify_at(self, &loc.chain, |target| {
                    *target = block;
                    Ok(())
                })?;
            }
        }
        for (array, count) in &counts {
            self.write_counter(schema, array, *count)?;
        }
        if !counts.is_empty() {
            self.apply_counts(schema)?;
        }
        Ok(())
    }

    /// Appends one entry to the list at `path`.
    pub fn append(
        &mut self,
        schema: &Component,
        path: &DataPath,
        entry: DataBlock,
    ) -> Result<(), Error> {
        let loc = locate(schema, self, path)?;
        let ComponentKind::List { element } = &loc.comp.kind else {
            return Err(Error::invalid_path(path.to_string(), "not a list"));
        };
        if !entry.conforms_to(element) {
            return Err(Error::ShapeMismatch {
                path: path.to_string(),
            });
        }
        modify_at(self, &loc.chain, |target| {
            let list = target.composite_mut().ok_or_else(|| Error::ShapeMismatch {
                path: path.to_string(),
            })?;
            list.children.push(entry);
            list.refresh();
            Ok(())
        })
    }

    /// Removes every entry of the list at `path`.
    pub fn clear_list(&mut self, schema: &Component, path: &DataPath) -> Result<(), Error> {
        let loc = locate(schema, self, path)?;
        if !matches!(loc.comp.kind, ComponentKind::List { .. }) {
            return Err(Error::invalid_path(path.to_string(), "not a list"));
        }
        modify_at(self, &loc.chain, |target| {
            let list = target.composite_mut().ok_or_else(|| Error::ShapeMismatch {
                path: path.to_string(),
            })?;
            list.children.clear();
            list.refresh();
            Ok(())
        })
    }
}

fn atoms_match(comp: &Component, atoms: &[Value]) -> bool {
    let mut expected = Vec::with_capacity(atoms.len());
    comp.push_default_atoms(&mut expected);
    expected.len() == atoms.len()
        && expected
            .iter()
            .zip(atoms)
            .all(|(e, a)| e.data_type() == a.data_type())
}
