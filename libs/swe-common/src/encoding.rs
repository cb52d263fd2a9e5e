//! Wire-format descriptors. An encoding is configuration shared by every codec reading or
//! writing a given stream; it never carries values.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::Error, types::DataType};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataEncoding {
    Text(TextEncoding),
    Binary(BinaryEncoding),
}

impl DataEncoding {
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            DataEncoding::Text(text) => text.validate(),
            DataEncoding::Binary(binary) => binary.validate(),
        }
    }
}

impl From<TextEncoding> for DataEncoding {
    fn from(value: TextEncoding) -> Self {
        DataEncoding::Text(value)
    }
}

impl From<BinaryEncoding> for DataEncoding {
    fn from(value: BinaryEncoding) -> Self {
        DataEncoding::Binary(value)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TextEncoding {
    pub token_separator: String,
    pub block_separator: String,
    #[serde(default = "default_decimal_separator")]
    pub decimal_separator: char,
    #[serde(default = "default_collapse")]
    pub collapse_white_spaces: bool,
}

fn default_decimal_separator() -> char {
    '.'
}

fn default_collapse() -> bool {
    true
}

impl TextEncoding {
    pub fn new(token_separator: impl Into<String>, block_separator: impl Into<String>) -> Self {
        TextEncoding {
            token_separator: token_separator.into(),
            block_separator: block_separator.into(),
            decimal_separator: default_decimal_separator(),
            collapse_white_spaces: default_collapse(),
        }
    }

    pub fn with_decimal_separator(mut self, separator: char) -> Self {
        self.decimal_separator = separator;
        self
    }

    pub fn with_collapse_white_spaces(mut self, collapse: bool) -> Self {
        self.collapse_white_spaces = collapse;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.token_separator.is_empty() || self.block_separator.is_empty() {
            return Err(Error::InvalidEncoding(
                "token and block separators must not be empty".to_string(),
            ));
        }
        if self.token_separator.contains(self.decimal_separator)
            || self.block_separator.contains(self.decimal_separator)
        {
            return Err(Error::InvalidEncoding(format!(
                "decimal separator `{}` collides with a separator",
                self.decimal_separator
            )));
        }
        Ok(())
    }
}

impl Default for TextEncoding {
    fn default() -> Self {
        TextEncoding::new(",", "\n")
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ByteEncoding {
    #[default]
    Raw,
    Base64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BinaryEncoding {
    pub byte_order: ByteOrder,
    pub byte_encoding: ByteEncoding,
    pub members: Vec<BinaryMember>,
}

impl BinaryEncoding {
    pub fn new(byte_order: ByteOrder, byte_encoding: ByteEncoding) -> Self {
        BinaryEncoding {
            byte_order,
            byte_encoding,
            members: vec![],
        }
    }

    pub fn with_member(mut self, member: impl Into<BinaryMember>) -> Self {
        self.members.push(member.into());
        self
    }

    /// Checks widths and padding independently of any schema.
    pub fn validate(&self) -> Result<(), Error> {
        for member in &self.members {
            let BinaryMember::Component(c) = member else {
                continue;
            };
            if let Some(bits) = c.bit_length {
                let max = c.data_type.bit_width().ok_or_else(|| {
                    Error::InvalidEncoding(format!(
                        "`{}`: {} cannot be bit packed",
                        c.reference, c.data_type
                    ))
                })?;
                if bits == 0 || bits > max || !c.data_type.is_bit_packable() {
                    return Err(Error::InvalidEncoding(format!(
                        "`{}`: bit length {bits} invalid for {}",
                        c.reference, c.data_type
                    )));
                }
            }
            if c.byte_length.is_some() && !c.data_type.is_string() {
                return Err(Error::InvalidEncoding(format!(
                    "`{}`: byte length only applies to strings",
                    c.reference
                )));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "member", rename_all = "snake_case")]
pub enum BinaryMember {
    Component(BinaryComponent),
    Block(BinaryBlock),
}

impl From<BinaryComponent> for BinaryMember {
    fn from(value: BinaryComponent) -> Self {
        BinaryMember::Component(value)
    }
}

impl From<BinaryBlock> for BinaryMember {
    fn from(value: BinaryBlock) -> Self {
        BinaryMember::Block(value)
    }
}

/// Physical encoding of one scalar (or both values of a range).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BinaryComponent {
    /// Schema path of the scalar, e.g. `"bins/val"`.
    pub reference: String,
    pub data_type: PhysicalType,
    /// Fixed on-wire size of a string, NUL padded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_length: Option<u32>,
    /// Zero bits written before the value.
    #[serde(default)]
    pub padding_before: u32,
    /// Zero bits written after the value.
    #[serde(default)]
    pub padding_after: u32,
}

impl BinaryComponent {
    pub fn new(reference: impl Into<String>, data_type: PhysicalType) -> Self {
        BinaryComponent {
            reference: reference.into(),
            data_type,
            byte_length: None,
            bit_length: None,
            padding_before: 0,
            padding_after: 0,
        }
    }

    pub fn with_bit_length(mut self, bits: u32) -> Self {
        self.bit_length = Some(bits);
        self
    }

    pub fn with_byte_length(mut self, bytes: usize) -> Self {
        self.byte_length = Some(bytes);
        self
    }

    pub fn with_padding(mut self, before: u32, after: u32) -> Self {
        self.padding_before = before;
        self.padding_after = after;
        self
    }
}

/// A compression and encryption boundary around the bytes of one subtree.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BinaryBlock {
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_length: Option<usize>,
    /// Zero bytes written before the block.
    #[serde(default)]
    pub padding_before: usize,
    /// Zero bytes written after the block.
    #[serde(default)]
    pub padding_after: usize,
}

impl BinaryBlock {
    pub fn new(reference: impl Into<String>) -> Self {
        BinaryBlock {
            reference: reference.into(),
            ..Default::default()
        }
    }

    pub fn with_compression(mut self, id: impl Into<String>) -> Self {
        self.compression = Some(id.into());
        self
    }

    pub fn with_encryption(mut self, id: impl Into<String>) -> Self {
        self.encryption = Some(id.into());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Ascii,
    Utf8,
}

impl PhysicalType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PhysicalType::Bool => "bool",
            PhysicalType::I8 => "i8",
            PhysicalType::U8 => "u8",
            PhysicalType::I16 => "i16",
            PhysicalType::U16 => "u16",
            PhysicalType::I32 => "i32",
            PhysicalType::U32 => "u32",
            PhysicalType::I64 => "i64",
            PhysicalType::U64 => "u64",
            PhysicalType::F32 => "f32",
            PhysicalType::F64 => "f64",
            PhysicalType::Ascii => "ascii",
            PhysicalType::Utf8 => "utf8",
        }
    }

    /// Natural on-wire size in bytes; `None` for strings.
    pub const fn byte_width(&self) -> Option<usize> {
        match self {
            PhysicalType::Bool | PhysicalType::I8 | PhysicalType::U8 => Some(1),
            PhysicalType::I16 | PhysicalType::U16 => Some(2),
            PhysicalType::I32 | PhysicalType::U32 | PhysicalType::F32 => Some(4),
            PhysicalType::I64 | PhysicalType::U64 | PhysicalType::F64 => Some(8),
            PhysicalType::Ascii | PhysicalType::Utf8 => None,
        }
    }

    pub const fn bit_width(&self) -> Option<u32> {
        match self.byte_width() {
            Some(b) => Some(b as u32 * 8),
            None => None,
        }
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, PhysicalType::Ascii | PhysicalType::Utf8)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(
            self,
            PhysicalType::I8 | PhysicalType::I16 | PhysicalType::I32 | PhysicalType::I64
        )
    }

    pub(crate) const fn is_bit_packable(&self) -> bool {
        !self.is_string() && !matches!(self, PhysicalType::F32 | PhysicalType::F64)
    }

    /// Natural physical type of a logical datatype.
    pub const fn natural(ty: DataType) -> Self {
        match ty {
            DataType::Bool => PhysicalType::Bool,
            DataType::I32 => PhysicalType::I32,
            DataType::U32 => PhysicalType::U32,
            DataType::I64 => PhysicalType::I64,
            DataType::U64 => PhysicalType::U64,
            DataType::F32 => PhysicalType::F32,
            DataType::F64 => PhysicalType::F64,
            DataType::Ascii => PhysicalType::Ascii,
            DataType::Utf8 => PhysicalType::Utf8,
        }
    }

    /// Whether values of `ty` can travel as this physical type.
    pub const fn carries(&self, ty: DataType) -> bool {
        if self.is_string() {
            ty.is_string()
        } else {
            !ty.is_string()
        }
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhysicalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "bool" | "boolean" => PhysicalType::Bool,
            "i8" | "byte" | "signedByte" => PhysicalType::I8,
            "u8" | "ubyte" | "unsignedByte" => PhysicalType::U8,
            "i16" | "short" | "signedShort" => PhysicalType::I16,
            "u16" | "ushort" | "unsignedShort" => PhysicalType::U16,
            "i32" | "int" | "signedInt" => PhysicalType::I32,
            "u32" | "uint" | "unsignedInt" => PhysicalType::U32,
            "i64" | "long" | "signedLong" => PhysicalType::I64,
            "u64" | "ulong" | "unsignedLong" => PhysicalType::U64,
            "f32" | "float" | "float32" => PhysicalType::F32,
            "f64" | "double" | "float64" => PhysicalType::F64,
            "ascii" | "string-ascii" => PhysicalType::Ascii,
            "utf8" | "utf" | "string-utf-8" => PhysicalType::Utf8,
            _ => {
                return Err(Error::InvalidEncoding(format!(
                    "unknown physical type `{s}`"
                )));
            }
        };
        Ok(ty)
    }
}
