use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Datatype of a scalar leaf.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Ascii,
    Utf8,
}

impl DataType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::I64 => "i64",
            DataType::U64 => "u64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::Ascii => "ascii",
            DataType::Utf8 => "utf8",
        }
    }

    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::I32 | DataType::U32 | DataType::I64 | DataType::U64
        )
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub const fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, DataType::Ascii | DataType::Utf8)
    }

    /// The zero value atoms of this type start with.
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Bool => Value::Bool(false),
            DataType::I32 => Value::I32(0),
            DataType::U32 => Value::U32(0),
            DataType::I64 => Value::I64(0),
            DataType::U64 => Value::U64(0),
            DataType::F32 => Value::F32(0.0),
            DataType::F64 => Value::F64(0.0),
            DataType::Ascii => Value::Ascii(String::new()),
            DataType::Utf8 => Value::Utf8(String::new()),
        }
    }

    /// Largest element count a counter of this type can hold.
    pub(crate) fn max_count(&self) -> Option<u64> {
        match self {
            DataType::I32 => Some(i32::MAX as u64),
            DataType::U32 => Some(u32::MAX as u64),
            DataType::I64 => Some(i64::MAX as u64),
            DataType::U64 => Some(u64::MAX),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s {
            "bool" | "boolean" => DataType::Bool,
            "i32" | "int" => DataType::I32,
            "u32" | "uint" => DataType::U32,
            "i64" | "long" => DataType::I64,
            "u64" | "ulong" => DataType::U64,
            "f32" | "float" => DataType::F32,
            "f64" | "double" => DataType::F64,
            "ascii" | "ascii-string" => DataType::Ascii,
            "utf8" | "utf8-string" | "string" => DataType::Utf8,
            _ => return Err(Error::InvalidEncoding(format!("unknown data type `{s}`"))),
        };
        Ok(ty)
    }
}

/// A single atom.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ascii(String),
    Utf8(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::Bool,
            Value::I32(_) => DataType::I32,
            Value::U32(_) => DataType::U32,
            Value::I64(_) => DataType::I64,
            Value::U64(_) => DataType::U64,
            Value::F32(_) => DataType::F32,
            Value::F64(_) => DataType::F64,
            Value::Ascii(_) => DataType::Ascii,
            Value::Utf8(_) => DataType::Utf8,
        }
    }

    /// Integer content as an `i128`, wide enough for every integer variant.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::I32(v) => Some(v as i128),
            Value::U32(v) => Some(v as i128),
            Value::I64(v) => Some(v as i128),
            Value::U64(v) => Some(v as i128),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v as f64),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Ascii(s) | Value::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Builds an integer atom of type `ty`, or `None` if `v` does not fit.
    pub fn from_int(ty: DataType, v: i128) -> Option<Value> {
        let value = match ty {
            DataType::I32 => Value::I32(i32::try_from(v).ok()?),
            DataType::U32 => Value::U32(u32::try_from(v).ok()?),
            DataType::I64 => Value::I64(i64::try_from(v).ok()?),
            DataType::U64 => Value::U64(u64::try_from(v).ok()?),
            _ => return None,
        };
        Some(value)
    }

    /// Numeric conversion used when a wire type differs from the declared
    /// type. Floats only convert to integers when they hold an integral value.
    pub fn cast(&self, ty: DataType) -> Option<Value> {
        if self.data_type() == ty {
            return Some(self.clone());
        }
        match (self, ty) {
            (Value::Ascii(s) | Value::Utf8(s), DataType::Utf8) => Some(Value::Utf8(s.clone())),
            (Value::Utf8(s), DataType::Ascii) if s.is_ascii() => Some(Value::Ascii(s.clone())),
            (Value::Bool(b), ty) if ty.is_integer() => Value::from_int(ty, *b as i128),
            (Value::Bool(b), DataType::F32) => Some(Value::F32(*b as u8 as f32)),
            (Value::Bool(b), DataType::F64) => Some(Value::F64(*b as u8 as f64)),
            (v, DataType::Bool) => {
                if let Some(i) = v.as_i128() {
                    Some(Value::Bool(i != 0))
                } else {
                    v.as_f64().map(|f| Value::Bool(f != 0.0))
                }
            }
            (v, DataType::F32) => v
                .as_i128()
                .map(|i| i as f32)
                .or_else(|| v.as_f64().map(|f| f as f32))
                .map(Value::F32),
            (v, DataType::F64) => v
                .as_i128()
                .map(|i| i as f64)
                .or_else(|| v.as_f64())
                .map(Value::F64),
            (v, ty) if ty.is_integer() => {
                if let Some(i) = v.as_i128() {
                    return Value::from_int(ty, i);
                }
                let f = v.as_f64()?;
                if f.fract() != 0.0 || !f.is_finite() {
                    return None;
                }
                Value::from_int(ty, f as i128)
            }
            _ => None,
        }
    }

    /// Parses a text token into an atom of type `ty`.
    pub fn parse_token(ty: DataType, token: &str, decimal_separator: char) -> Option<Value> {
        let value = match ty {
            DataType::Bool => match token {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return None,
            },
            DataType::I32 => Value::I32(token.parse().ok()?),
            DataType::U32 => Value::U32(token.parse().ok()?),
            DataType::I64 => Value::I64(token.parse().ok()?),
            DataType::U64 => Value::U64(token.parse().ok()?),
            DataType::F32 => Value::F32(parse_float(token, decimal_separator)? as f32),
            DataType::F64 => Value::F64(parse_float(token, decimal_separator)?),
            DataType::Ascii if token.is_ascii() => Value::Ascii(token.to_string()),
            DataType::Ascii => return None,
            DataType::Utf8 => Value::Utf8(token.to_string()),
        };
        Some(value)
    }

    /// Writes the text form of this atom into `out`.
    pub fn format_token(&self, decimal_separator: char, out: &mut String) {
        use fmt::Write;
        let _ = match self {
            Value::Bool(v) => write!(out, "{v}"),
            Value::I32(v) => write!(out, "{v}"),
            Value::U32(v) => write!(out, "{v}"),
            Value::I64(v) => write!(out, "{v}"),
            Value::U64(v) => write!(out, "{v}"),
            Value::F32(v) => {
                format_float(*v as f64, Some(*v), decimal_separator, out);
                Ok(())
            }
            Value::F64(v) => {
                format_float(*v, None, decimal_separator, out);
                Ok(())
            }
            Value::Ascii(s) | Value::Utf8(s) => {
                out.push_str(s);
                Ok(())
            }
        };
    }
}

fn parse_float(token: &str, decimal_separator: char) -> Option<f64> {
    match token {
        "NaN" | "nan" => return Some(f64::NAN),
        "INF" | "+INF" | "inf" | "Infinity" => return Some(f64::INFINITY),
        "-INF" | "-inf" | "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    if decimal_separator == '.' {
        token.parse().ok()
    } else {
        token.replace(decimal_separator, ".").parse().ok()
    }
}

fn format_float(v: f64, narrow: Option<f32>, decimal_separator: char, out: &mut String) {
    use fmt::Write;
    if v.is_nan() {
        out.push_str("NaN");
        return;
    }
    if v.is_infinite() {
        out.push_str(if v > 0.0 { "INF" } else { "-INF" });
        return;
    }
    let start = out.len();
    // Debug keeps the shortest round-trip digits and always carries a fraction
    let _ = match narrow {
        Some(f) => write!(out, "{f:?}"),
        None => write!(out, "{v:?}"),
    };
    if decimal_separator != '.' {
        let formatted = out[start..].replace('.', decimal_separator.encode_utf8(&mut [0; 4]));
        out.truncate(start);
        out.push_str(&formatted);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.format_token('.', &mut s);
        f.write_str(&s)
    }
}

macro_rules! impl_value_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_value_from!(bool, Bool);
impl_value_from!(i32, I32);
impl_value_from!(u32, U32);
impl_value_from!(i64, I64);
impl_value_from!(u64, U64);
impl_value_from!(f32, F32);
impl_value_from!(f64, F64);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}
