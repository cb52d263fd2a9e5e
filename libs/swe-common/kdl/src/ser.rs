use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use swe_common::{
    BinaryBlock, BinaryComponent, BinaryEncoding, BinaryMember, ByteEncoding, ByteOrder,
    Component, ComponentKind, DataEncoding, ElementCount, TextEncoding,
};

/// Writes a component tree and its encodings as an autoformatted document.
pub fn serialize_document(schema: &Component, encodings: &[DataEncoding]) -> String {
    let mut doc = KdlDocument::new();
    doc.nodes_mut().push(serialize_component(schema));
    for encoding in encodings {
        doc.nodes_mut().push(serialize_encoding(encoding));
    }
    doc.autoformat();
    doc.to_string()
}

fn serialize_component(comp: &Component) -> KdlNode {
    let (kind, ty) = match &comp.kind {
        ComponentKind::Scalar(ty) => ("scalar", Some(ty)),
        ComponentKind::Range(ty) => ("range", Some(ty)),
        ComponentKind::Record(_) => ("record", None),
        ComponentKind::Array { .. } => ("array", None),
        ComponentKind::List { .. } => ("list", None),
    };
    let mut node = KdlNode::new(kind);
    node.entries_mut().push(KdlEntry::new(comp.name.clone()));
    if let Some(ty) = ty {
        node.entries_mut().push(KdlEntry::new_prop("type", ty.as_str()));
    }

    match &comp.kind {
        ComponentKind::Record(fields) => {
            let mut children = KdlDocument::new();
            for field in fields {
                children.nodes_mut().push(serialize_component(field));
            }
            node.set_children(children);
        }
        ComponentKind::Array { element, count } => {
            match count {
                ElementCount::Fixed(n) => node
                    .entries_mut()
                    .push(KdlEntry::new_prop("size", int(*n))),
                ElementCount::Ref(counter) => node
                    .entries_mut()
                    .push(KdlEntry::new_prop("count", counter.clone())),
            }
            node.set_children(single_child(serialize_component(element)));
        }
        ComponentKind::List { element } => {
            node.set_children(single_child(serialize_component(element)));
        }
        ComponentKind::Scalar(_) | ComponentKind::Range(_) => {}
    }
    node
}

fn single_child(child: KdlNode) -> KdlDocument {
    let mut doc = KdlDocument::new();
    doc.nodes_mut().push(child);
    doc
}

fn serialize_encoding(encoding: &DataEncoding) -> KdlNode {
    match encoding {
        DataEncoding::Text(text) => serialize_text(text),
        DataEncoding::Binary(binary) => serialize_binary(binary),
    }
}

fn serialize_text(text: &TextEncoding) -> KdlNode {
    let mut node = KdlNode::new("encoding");
    let entries = node.entries_mut();
    entries.push(KdlEntry::new("text"));
    entries.push(KdlEntry::new_prop(
        "token_separator",
        text.token_separator.clone(),
    ));
    entries.push(KdlEntry::new_prop(
        "block_separator",
        text.block_separator.clone(),
    ));
    entries.push(KdlEntry::new_prop(
        "decimal_separator",
        text.decimal_separator.to_string(),
    ));
    entries.push(KdlEntry::new_prop(
        "collapse_white_spaces",
        text.collapse_white_spaces,
    ));
    node
}

fn serialize_binary(binary: &BinaryEncoding) -> KdlNode {
    let mut node = KdlNode::new("encoding");
    node.entries_mut().push(KdlEntry::new("binary"));
    let byte_order = match binary.byte_order {
        ByteOrder::BigEndian => "big",
        ByteOrder::LittleEndian => "little",
    };
    node.entries_mut()
        .push(KdlEntry::new_prop("byte_order", byte_order));
    if binary.byte_encoding == ByteEncoding::Base64 {
        node.entries_mut()
            .push(KdlEntry::new_prop("byte_encoding", "base64"));
    }

    if !binary.members.is_empty() {
        let mut children = KdlDocument::new();
        for member in &binary.members {
            let child = match member {
                BinaryMember::Component(c) => serialize_binary_component(c),
                BinaryMember::Block(b) => serialize_binary_block(b),
            };
            children.nodes_mut().push(child);
        }
        node.set_children(children);
    }
    node
}

fn serialize_binary_component(member: &BinaryComponent) -> KdlNode {
    let mut node = KdlNode::new("component");
    node.entries_mut()
        .push(KdlEntry::new(member.reference.clone()));
    node.entries_mut()
        .push(KdlEntry::new_prop("type", member.data_type.as_str()));
    if let Some(bits) = member.bit_length {
        node.entries_mut()
            .push(KdlEntry::new_prop("bit_length", int(bits as usize)));
    }
    if let Some(bytes) = member.byte_length {
        node.entries_mut()
            .push(KdlEntry::new_prop("byte_length", int(bytes)));
    }
    if member.padding_before != 0 {
        node.entries_mut()
            .push(KdlEntry::new_prop("padding_before", int(member.padding_before as usize)));
    }
    if member.padding_after != 0 {
        node.entries_mut()
            .push(KdlEntry::new_prop("padding_after", int(member.padding_after as usize)));
    }
    node
}

fn serialize_binary_block(member: &BinaryBlock) -> KdlNode {
    let mut node = KdlNode::new("block");
    node.entries_mut()
        .push(KdlEntry::new(member.reference.clone()));
    if let Some(ref compression) = member.compression {
        node.entries_mut()
            .push(KdlEntry::new_prop("compression", compression.clone()));
    }
    if let Some(ref encryption) = member.encryption {
        node.entries_mut()
            .push(KdlEntry::new_prop("encryption", encryption.clone()));
    }
    if let Some(bytes) = member.byte_length {
        node.entries_mut()
            .push(KdlEntry::new_prop("byte_length", int(bytes)));
    }
    if member.padding_before != 0 {
        node.entries_mut()
            .push(KdlEntry::new_prop("padding_before", int(member.padding_before as usize)));
    }
    if member.padding_after != 0 {
        node.entries_mut()
            .push(KdlEntry::new_prop("padding_after", int(member.padding_after as usize)));
    }
    node
}

fn int(n: usize) -> KdlValue {
    KdlValue::Integer(n as i128)
}
