use std::str::FromStr;

use kdl::{KdlDocument, KdlNode};
use swe_common::{
    BinaryBlock, BinaryComponent, BinaryEncoding, BinaryMember, ByteEncoding, ByteOrder,
    Component, DataEncoding, DataType, ElementCount, PhysicalType, TextEncoding,
};

use crate::KdlSchemaError;

/// Parses a component tree and the encodings declared for it.
pub fn parse_document(input: &str) -> Result<(Component, Vec<DataEncoding>), KdlSchemaError> {
    let doc = input
        .parse::<KdlDocument>()
        .map_err(|source| KdlSchemaError::ParseError {
            source,
            src: input.to_string(),
            span: (0, input.len()).into(),
        })?;

    let mut root: Option<(Component, &KdlNode)> = None;
    let mut encodings = Vec::new();

    for node in doc.nodes() {
        if node.name().value() == "encoding" {
            let encoding = parse_encoding(node, input)?;
            encoding
                .validate()
                .map_err(|source| KdlSchemaError::InvalidEncoding {
                    source,
                    src: input.to_string(),
                    span: node.span(),
                })?;
            encodings.push(encoding);
            continue;
        }
        if root.is_some() {
            return Err(KdlSchemaError::DuplicateRoot {
                src: input.to_string(),
                span: node.span(),
            });
        }
        root = Some((parse_component(node, input)?, node));
    }

    let Some((schema, node)) = root else {
        return Err(KdlSchemaError::MissingRoot {
            src: input.to_string(),
        });
    };
    schema
        .validate()
        .map_err(|source| KdlSchemaError::InvalidSchema {
            source,
            src: input.to_string(),
            span: node.span(),
        })?;
    Ok((schema, encodings))
}

fn parse_component(node: &KdlNode, src: &str) -> Result<Component, KdlSchemaError> {
    match node.name().value() {
        "scalar" => Ok(Component::scalar(node_name(node, src)?, data_type(node, src)?)),
        "range" => Ok(Component::range(node_name(node, src)?, data_type(node, src)?)),
        "record" => {
            let mut record = Component::record(node_name(node, src)?);
            for child in child_nodes(node) {
                let field = parse_component(child, src)?;
                record
                    .add_field(field)
                    .map_err(|source| KdlSchemaError::InvalidSchema {
                        source,
                        src: src.to_string(),
                        span: child.span(),
                    })?;
            }
            Ok(record)
        }
        "array" => {
            let name = node_name(node, src)?;
            let element = single_element(node, src)?;
            let count = match (node.get("size"), node.get("count")) {
                (Some(_), None) => ElementCount::Fixed(required_int(node, "size", src)?),
                (None, Some(_)) => ElementCount::Ref(required_str(node, "count", src)?.to_string()),
                _ => {
                    return Err(invalid_value(
                        node,
                        "size",
                        "exactly one of `size` or `count`",
                        src,
                    ));
                }
            };
            Ok(Component::array(name, element, count))
        }
        "list" => Ok(Component::list(
            node_name(node, src)?,
            single_element(node, src)?,
        )),
        _ => Err(unknown_node(node, src)),
    }
}

fn single_element(node: &KdlNode, src: &str) -> Result<Component, KdlSchemaError> {
    match child_nodes(node) {
        [element] => parse_component(element, src),
        children => Err(KdlSchemaError::ElementCount {
            node: node.name().to_string(),
            found: children.len(),
            src: src.to_string(),
            span: node.span(),
        }),
    }
}

fn parse_encoding(node: &KdlNode, src: &str) -> Result<DataEncoding, KdlSchemaError> {
    match node_name(node, src)? {
        "text" => parse_text_encoding(node, src).map(DataEncoding::Text),
        "binary" => parse_binary_encoding(node, src).map(DataEncoding::Binary),
        _ => Err(invalid_value(node, "kind", "`text` or `binary`", src)),
    }
}

fn parse_text_encoding(node: &KdlNode, src: &str) -> Result<TextEncoding, KdlSchemaError> {
    let defaults = TextEncoding::default();
    let token = optional_str(node, "token_separator", src)?
        .unwrap_or(&defaults.token_separator)
        .to_string();
    let block = optional_str(node, "block_separator", src)?
        .unwrap_or(&defaults.block_separator)
        .to_string();
    let mut text = TextEncoding::new(token, block);

    if let Some(separator) = optional_str(node, "decimal_separator", src)? {
        let mut chars = separator.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return Err(invalid_value(
                node,
                "decimal_separator",
                "a single character",
                src,
            ));
        };
        text = text.with_decimal_separator(c);
    }
    if let Some(collapse) = optional_bool(node, "collapse_white_spaces", src)? {
        text = text.with_collapse_white_spaces(collapse);
    }
    Ok(text)
}

fn parse_binary_encoding(node: &KdlNode, src: &str) -> Result<BinaryEncoding, KdlSchemaError> {
    let byte_order = match optional_str(node, "byte_order", src)? {
        None => ByteOrder::default(),
        Some("big" | "big_endian") => ByteOrder::BigEndian,
        Some("little" | "little_endian") => ByteOrder::LittleEndian,
        Some(_) => return Err(invalid_value(node, "byte_order", "`big` or `little`", src)),
    };
    let byte_encoding = match optional_str(node, "byte_encoding", src)? {
        None => ByteEncoding::default(),
        Some("raw") => ByteEncoding::Raw,
        Some("base64") => ByteEncoding::Base64,
        Some(_) => {
            return Err(invalid_value(
                node,
                "byte_encoding",
                "`raw` or `base64`",
                src,
            ));
        }
    };

    let mut binary = BinaryEncoding::new(byte_order, byte_encoding);
    for child in child_nodes(node) {
        binary.members.push(parse_member(child, src)?);
    }
    Ok(binary)
}

fn parse_member(node: &KdlNode, src: &str) -> Result<BinaryMember, KdlSchemaError> {
    match node.name().value() {
        "component" => {
            let ty = required_str(node, "type", src)?;
            let data_type = PhysicalType::from_str(ty)
                .map_err(|_| invalid_value(node, "type", "a physical type such as `u16`", src))?;
            let mut member = BinaryComponent::new(node_name(node, src)?, data_type);
            member.bit_length = optional_int(node, "bit_length", src)?;
            member.byte_length = optional_int(node, "byte_length", src)?;
            member.padding_before = optional_int(node, "padding_before", src)?.unwrap_or(0);
            member.padding_after = optional_int(node, "padding_after", src)?.unwrap_or(0);
            Ok(BinaryMember::Component(member))
        }
        "block" => {
            let mut member = BinaryBlock::new(node_name(node, src)?);
            member.compression = optional_str(node, "compression", src)?.map(str::to_string);
            member.encryption = optional_str(node, "encryption", src)?.map(str::to_string);
            member.byte_length = optional_int(node, "byte_length", src)?;
            member.padding_before = optional_int(node, "padding_before", src)?.unwrap_or(0);
            member.padding_after = optional_int(node, "padding_after", src)?.unwrap_or(0);
            Ok(BinaryMember::Block(member))
        }
        _ => Err(unknown_node(node, src)),
    }
}

fn child_nodes(node: &KdlNode) -> &[KdlNode] {
    node.children().map(|c| c.nodes()).unwrap_or_default()
}

/// First positional argument.
fn node_name<'a>(node: &'a KdlNode, src: &str) -> Result<&'a str, KdlSchemaError> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| KdlSchemaError::MissingProperty {
            property: "name".to_string(),
            node: node.name().to_string(),
            src: src.to_string(),
            span: node.span(),
        })
}

fn data_type(node: &KdlNode, src: &str) -> Result<DataType, KdlSchemaError> {
    let ty = required_str(node, "type", src)?;
    DataType::from_str(ty).map_err(|_| invalid_value(node, "type", "a data type such as `f64`", src))
}

fn required_str<'a>(
    node: &'a KdlNode,
    property: &str,
    src: &str,
) -> Result<&'a str, KdlSchemaError> {
    optional_str(node, property, src)?.ok_or_else(|| KdlSchemaError::MissingProperty {
        property: property.to_string(),
        node: node.name().to_string(),
        src: src.to_string(),
        span: node.span(),
    })
}

fn optional_str<'a>(
    node: &'a KdlNode,
    property: &str,
    src: &str,
) -> Result<Option<&'a str>, KdlSchemaError> {
    node.get(property)
        .map(|v| {
            v.as_string()
                .ok_or_else(|| invalid_value(node, property, "a string", src))
        })
        .transpose()
}

fn optional_bool(node: &KdlNode, property: &str, src: &str) -> Result<Option<bool>, KdlSchemaError> {
    node.get(property)
        .map(|v| {
            v.as_bool()
                .ok_or_else(|| invalid_value(node, property, "#true or #false", src))
        })
        .transpose()
}

fn required_int<T: TryFrom<i128>>(
    node: &KdlNode,
    property: &str,
    src: &str,
) -> Result<T, KdlSchemaError> {
    optional_int(node, property, src)?.ok_or_else(|| KdlSchemaError::MissingProperty {
        property: property.to_string(),
        node: node.name().to_string(),
        src: src.to_string(),
        span: node.span(),
    })
}

fn optional_int<T: TryFrom<i128>>(
    node: &KdlNode,
    property: &str,
    src: &str,
) -> Result<Option<T>, KdlSchemaError> {
    node.get(property)
        .map(|v| {
            v.as_integer()
                .and_then(|n| T::try_from(n).ok())
                .ok_or_else(|| invalid_value(node, property, "a non-negative integer", src))
        })
        .transpose()
}

fn invalid_value(node: &KdlNode, property: &str, expected: &str, src: &str) -> KdlSchemaError {
    let span = node
        .entry(property)
        .map(|e| e.span())
        .unwrap_or_else(|| node.span());
    KdlSchemaError::InvalidValue {
        property: property.to_string(),
        node: node.name().to_string(),
        expected: expected.to_string(),
        src: src.to_string(),
        span,
    }
}

fn unknown_node(node: &KdlNode, src: &str) -> KdlSchemaError {
    KdlSchemaError::UnknownNode {
        node_type: node.name().to_string(),
        src: src.to_string(),
        span: node.span(),
    }
}
