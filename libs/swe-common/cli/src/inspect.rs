use std::fmt::Write;

use serde::Serialize;
use swe_common::{Component, ComponentKind, DataEncoding, ElementCount};

#[derive(Serialize)]
pub struct Inspection<'a> {
    pub schema: &'a Component,
    pub encodings: &'a [DataEncoding],
}

/// One line per component, indented by depth, with its atom count.
pub fn render_tree(schema: &Component) -> String {
    let mut out = String::new();
    render(schema, 0, &mut out);
    out
}

fn render(comp: &Component, depth: usize, out: &mut String) {
    let atoms = match comp.fixed_atom_count() {
        Some(n) => format!("{n} atoms"),
        None => "variable".to_string(),
    };
    let indent = "  ".repeat(depth);
    let _ = match &comp.kind {
        ComponentKind::Scalar(ty) => writeln!(out, "{indent}{} {ty} ({atoms})", comp.name),
        ComponentKind::Range(ty) => writeln!(out, "{indent}{} range<{ty}> ({atoms})", comp.name),
        ComponentKind::Record(_) => writeln!(out, "{indent}{} record ({atoms})", comp.name),
        ComponentKind::Array {
            count: ElementCount::Fixed(n),
            ..
        } => writeln!(out, "{indent}{} array[{n}] ({atoms})", comp.name),
        ComponentKind::Array {
            count: ElementCount::Ref(counter),
            ..
        } => writeln!(out, "{indent}{} array[{counter}] ({atoms})", comp.name),
        ComponentKind::List { .. } => writeln!(out, "{indent}{} list ({atoms})", comp.name),
    };
    match &comp.kind {
        ComponentKind::Record(fields) => {
            for field in fields {
                render(field, depth + 1, out);
            }
        }
        ComponentKind::Array { element, .. } | ComponentKind::List { element } => {
            render(element, depth + 1, out);
        }
        ComponentKind::Scalar(_) | ComponentKind::Range(_) => {}
    }
}
