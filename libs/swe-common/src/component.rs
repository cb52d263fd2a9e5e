//! Components describe the shape of a record once, independently of any value.
//!
//! A component tree is built with the constructors on [`Component`] and then shared
//! (usually behind an `Arc`) by every block, parser and writer that uses it. Nodes are
//! addressed either by a schema path, which walks through arrays by their element's
//! name, or by a [`DataPath`], which selects array and list entries by index.
//!
//! ```rust
//! use swe_common::{Component, DataType, ElementCount};
//!
//! let weather = Component::record("weather")
//!     .with_field(Component::scalar("time", DataType::F64))?
//!     .with_field(Component::scalar("num_bins", DataType::I32))?
//!     .with_field(Component::array(
//!         "bins",
//!         Component::scalar("val", DataType::F64),
//!         ElementCount::Ref("num_bins".into()),
//!     ))?;
//! weather.validate()?;
//! assert_eq!(weather.resolve_path("bins/val")?.name, "val");
//! # Ok::<(), swe_common::Error>(())
//! ```

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::Error, types::DataType};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Scalar(DataType),
    Record(Vec<Component>),
    Array {
        element: Box<Component>,
        count: ElementCount,
    },
    List {
        element: Box<Component>,
    },
    /// A `(min, max)` pair of one scalar type.
    Range(DataType),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElementCount {
    Fixed(usize),
    /// Name of an integer scalar declared before the array in an enclosing record.
    Ref(String),
}

/// How the atoms of a component are stored inside a [`DataBlock`](crate::DataBlock).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// A fixed number of atoms, stored inline in the enclosing atomic block.
    Flat(usize),
    /// A variable array of flat elements, stored as one atomic block of `stride * len` atoms.
    VarAtomic { stride: usize },
    /// A record with at least one variable-size descendant; one child block per field.
    Mixed,
    /// An array or list of variable-size elements; one child block per element.
    Sequence,
}

impl Component {
    pub fn scalar(name: impl Into<String>, ty: DataType) -> Self {
        Component {
            name: name.into(),
            kind: ComponentKind::Scalar(ty),
        }
    }

    pub fn record(name: impl Into<String>) -> Self {
        Component {
            name: name.into(),
            kind: ComponentKind::Record(vec![]),
        }
    }

    pub fn array(name: impl Into<String>, element: Component, count: ElementCount) -> Self {
        Component {
            name: name.into(),
            kind: ComponentKind::Array {
                element: Box::new(element),
                count,
            },
        }
    }

    pub fn list(name: impl Into<String>, element: Component) -> Self {
        Component {
            name: name.into(),
            kind: ComponentKind::List {
                element: Box::new(element),
            },
        }
    }

    pub fn range(name: impl Into<String>, ty: DataType) -> Self {
        Component {
            name: name.into(),
            kind: ComponentKind::Range(ty),
        }
    }

    /// Appends a field to a record, keeping declaration order.
    pub fn add_field(&mut self, field: Component) -> Result<&mut Self, Error> {
        let ComponentKind::Record(fields) = &mut self.kind else {
            return Err(Error::InvalidSchema {
                path: self.name.clone(),
                reason: "only records have fields".to_string(),
            });
        };
        if fields.iter().any(|f| f.name == field.name) {
            return Err(Error::DuplicateName {
                parent: self.name.clone(),
                name: field.name,
            });
        }
        fields.push(field);
        Ok(self)
    }

    /// Same as [`Component::add_field`], renaming the component to `name` first.
    pub fn add_component(
        &mut self,
        name: impl Into<String>,
        mut component: Component,
    ) -> Result<&mut Self, Error> {
        component.name = name.into();
        self.add_field(component)
    }

    pub fn with_field(mut self, field: Component) -> Result<Self, Error> {
        self.add_field(field)?;
        Ok(self)
    }

    /// Replaces the element template of an array or list.
    pub fn set_element(&mut self, element: Component) -> Result<&mut Self, Error> {
        match &mut self.kind {
            ComponentKind::Array { element: e, .. } | ComponentKind::List { element: e } => {
                **e = element;
                Ok(self)
            }
            _ => Err(Error::InvalidSchema {
                path: self.name.clone(),
                reason: "only arrays and lists have an element".to_string(),
            }),
        }
    }

    pub fn fields(&self) -> &[Component] {
        match &self.kind {
            ComponentKind::Record(fields) => fields,
            _ => &[],
        }
    }

    pub fn element(&self) -> Option<&Component> {
        match &self.kind {
            ComponentKind::Array { element, .. } | ComponentKind::List { element } => {
                Some(&**element)
            }
            _ => None,
        }
    }

    /// Datatype of a scalar or range.
    pub fn data_type(&self) -> Option<DataType> {
        match self.kind {
            ComponentKind::Scalar(ty) | ComponentKind::Range(ty) => Some(ty),
            _ => None,
        }
    }

    pub(crate) fn is_counter_candidate(&self) -> bool {
        matches!(self.kind, ComponentKind::Scalar(ty) if ty.is_integer())
    }

    pub fn layout(&self) -> Layout {
        match &self.kind {
            ComponentKind::Scalar(_) => Layout::Flat(1),
            ComponentKind::Range(_) => Layout::Flat(2),
            ComponentKind::Record(fields) => {
                let mut total = 0usize;
                for field in fields {
                    match field.layout() {
                        Layout::Flat(n) => total += n,
                        _ => return Layout::Mixed,
                    }
                }
                Layout::Flat(total)
            }
            ComponentKind::Array { element, count } => match (element.layout(), count) {
                (Layout::Flat(k), ElementCount::Fixed(n)) => Layout::Flat(k.saturating_mul(*n)),
                (Layout::Flat(k), ElementCount::Ref(_)) if k > 0 => Layout::VarAtomic { stride: k },
                _ => Layout::Sequence,
            },
            ComponentKind::List { .. } => Layout::Sequence,
        }
    }

    /// Number of atoms of a fixed-size component, `None` when the size varies.
    pub fn fixed_atom_count(&self) -> Option<usize> {
        match self.layout() {
            Layout::Flat(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        self.fixed_atom_count().is_none()
    }

    /// Checks names, counts and range types of the whole tree.
    pub fn validate(&self) -> Result<(), Error> {
        let mut scopes = vec![];
        self.validate_inner(&self.name, &mut scopes)
    }

    fn validate_inner<'a>(&'a self, path: &str, scopes: &mut Vec<&'a str>) -> Result<(), Error> {
        match &self.kind {
            ComponentKind::Scalar(_) => Ok(()),
            ComponentKind::Range(ty) => {
                if ty.is_numeric() {
                    Ok(())
                } else {
                    Err(Error::InvalidSchema {
                        path: path.to_string(),
                        reason: format!("range over non numeric type {ty}"),
                    })
                }
            }
            ComponentKind::Record(fields) => {
                let depth = scopes.len();
                for (i, field) in fields.iter().enumerate() {
                    if fields[..i].iter().any(|f| f.name == field.name) {
                        return Err(Error::DuplicateName {
                            parent: path.to_string(),
                            name: field.name.clone(),
                        });
                    }
                    field.validate_inner(&format!("{path}/{}", field.name), scopes)?;
                    if field.is_counter_candidate() {
                        scopes.push(&field.name);
                    }
                }
                scopes.truncate(depth);
                Ok(())
            }
            ComponentKind::Array { element, count } => {
                match count {
                    ElementCount::Fixed(0) => {
                        return Err(Error::InvalidSchema {
                            path: path.to_string(),
                            reason: "fixed arrays need at least one element".to_string(),
                        });
                    }
                    ElementCount::Fixed(_) => {}
                    ElementCount::Ref(counter) => {
                        if !scopes.iter().any(|s| s == counter) {
                            return Err(Error::UnresolvedCount {
                                array: path.to_string(),
                                counter: counter.clone(),
                            });
                        }
                    }
                }
                element.validate_inner(&format!("{path}/{}", element.name), scopes)
            }
            ComponentKind::List { element } => {
                element.validate_inner(&format!("{path}/{}", element.name), scopes)
            }
        }
    }

    /// Finds a node by schema path, e.g. `"bins/val"` where `val` is the element of `bins`.
    pub fn resolve_path(&self, path: &str) -> Result<&Component, Error> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = match &node.kind {
                ComponentKind::Record(fields) => fields.iter().find(|f| f.name == segment),
                ComponentKind::Array { element, .. } | ComponentKind::List { element }
                    if element.name == segment =>
                {
                    Some(&**element)
                }
                _ => None,
            }
            .ok_or_else(|| Error::invalid_path(path, format!("no component `{segment}`")))?;
        }
        Ok(node)
    }

    /// Like [`Component::resolve_path`] but the target must be able to hold a value.
    pub fn resolve_value_path(&self, path: &str) -> Result<&Component, Error> {
        let node = self.resolve_path(path)?;
        match node.kind {
            ComponentKind::Scalar(_) | ComponentKind::Range(_) => Ok(node),
            _ => Err(Error::invalid_path(path, "not a scalar or range")),
        }
    }

    /// Parses a textual data path and checks it against this tree.
    pub fn data_path(&self, path: &str) -> Result<DataPath, Error> {
        let path: DataPath = path.parse()?;
        self.component_at(&path)?;
        Ok(path)
    }

    /// Node addressed by a data path; fixed-size bounds are checked, variable ones are not.
    pub fn component_at(&self, path: &DataPath) -> Result<&Component, Error> {
        let mut node = self;
        for segment in path.segments() {
            node = match (&node.kind, segment) {
                (ComponentKind::Record(fields), PathSegment::Name(name)) => {
                    fields.iter().find(|f| &f.name == name)
                }
                (
                    ComponentKind::Array {
                        element,
                        count: ElementCount::Fixed(n),
                    },
                    PathSegment::Index(i),
                ) if i < n => Some(&**element),
                (
                    ComponentKind::Array {
                        element,
                        count: ElementCount::Ref(_),
                    }
                    | ComponentKind::List { element },
                    PathSegment::Index(_),
                ) => Some(&**element),
                _ => None,
            }
            .ok_or_else(|| Error::invalid_path(path.to_string(), format!("bad segment `{segment}`")))?;
        }
        Ok(node)
    }

    /// Data path of the counter scalar driving the array at `array`.
    pub fn count_reference(&self, array: &DataPath) -> Result<DataPath, Error> {
        // (fields of an enclosing record, depth of that record in the path, field taken)
        let mut frames: Vec<(&[Component], usize, usize)> = vec![];
        let mut node = self;
        for (depth, segment) in array.segments().iter().enumerate() {
            node = match (&node.kind, segment) {
                (ComponentKind::Record(fields), PathSegment::Name(name)) => {
                    let idx = fields.iter().position(|f| &f.name == name).ok_or_else(|| {
                        Error::invalid_path(array.to_string(), format!("no field `{name}`"))
                    })?;
                    frames.push((fields.as_slice(), depth, idx));
                    &fields[idx]
                }
                (_, PathSegment::Index(_)) => node.element().ok_or_else(|| {
                    Error::invalid_path(array.to_string(), "index into a non array")
                })?,
                _ => {
                    return Err(Error::invalid_path(
                        array.to_string(),
                        format!("bad segment `{segment}`"),
                    ));
                }
            };
        }
        let ComponentKind::Array {
            count: ElementCount::Ref(counter),
            ..
        } = &node.kind
        else {
            return Err(Error::invalid_path(
                array.to_string(),
                "not an array with a count reference",
            ));
        };
        for (fields, depth, idx) in frames.iter().rev() {
            if fields[..*idx]
                .iter()
                .any(|f| &f.name == counter && f.is_counter_candidate())
            {
                let mut path = DataPath(array.segments()[..*depth].to_vec());
                path.push(PathSegment::Name(counter.clone()));
                return Ok(path);
            }
        }
        Err(Error::UnresolvedCount {
            array: array.to_string(),
            counter: counter.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Name(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Name(name) => f.write_str(name),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// Address of a node inside a data block, relative to the root component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DataPath(Vec<PathSegment>);

impl DataPath {
    pub fn root() -> Self {
        DataPath::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    pub fn pop(&mut self) -> Option<PathSegment> {
        self.0.pop()
    }

    pub fn join(&self, segment: PathSegment) -> Self {
        let mut path = self.clone();
        path.push(segment);
        path
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for DataPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.parse::<usize>() {
                Ok(i) => PathSegment::Index(i),
                Err(_) => PathSegment::Name(s.to_string()),
            })
            .collect();
        Ok(DataPath(segments))
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<Vec<PathSegment>> for DataPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        DataPath(segments)
    }
}
