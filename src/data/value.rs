//! Structured values stored in object columns

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element descriptor of a little-endian 64-bit integer array
pub const I64_DESCR: &str = "<i8";
/// Element descriptor of a little-endian 64-bit float array
pub const F64_DESCR: &str = "<f8";

/// A structured value
///
/// Maps keep their pairs in insertion order and accept any value as key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Array(NdArray),
}

impl Value {
    /// Build a map from key/value pairs
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Build a binary blob value
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a string key in a map value
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<NdArray> for Value {
    fn from(v: NdArray) -> Self {
        Value::Array(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b[{} bytes]", b.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Array(a) => write!(f, "array({}, shape={:?})", a.descr, a.shape),
        }
    }
}

// ============================================================================
// Numeric arrays
// ============================================================================

/// Element type of an [`NdArray`]
///
/// `Primitive` holds a dtype string of the form `<byteorder><kind><size>`
/// (e.g. `<i8`, `<f4`, `|b1`). `Record` holds `(field name, dtype string)`
/// pairs for structured elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementDescr {
    Primitive(String),
    Record(Vec<(String, String)>),
}

impl ElementDescr {
    /// Size of one element in bytes, if the descriptor is well formed
    pub fn item_size(&self) -> Option<usize> {
        match self {
            ElementDescr::Primitive(s) => primitive_item_size(s),
            ElementDescr::Record(fields) => {
                if fields.is_empty() {
                    return None;
                }
                fields
                    .iter()
                    .map(|(_, d)| primitive_item_size(d))
                    .sum::<Option<usize>>()
            }
        }
    }
}

impl fmt::Display for ElementDescr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementDescr::Primitive(s) => f.write_str(s),
            ElementDescr::Record(fields) => {
                write!(f, "[")?;
                for (i, (name, d)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "({}, {})", name, d)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn primitive_item_size(descr: &str) -> Option<usize> {
    let body = descr.trim_start_matches(['<', '>', '|', '=']);
    let mut chars = body.chars();
    let kind = chars.next()?;
    let size: usize = chars.as_str().parse().ok()?;
    match kind {
        'b' | 'i' | 'u' | 'f' | 'c' | 'S' | 'V' | 'm' | 'M' => Some(size),
        // unicode code points are four bytes wide
        'U' => Some(size * 4),
        _ => None,
    }
}

/// A fixed-shape array stored as raw little-endian element bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    pub descr: ElementDescr,
    pub shape: Vec<usize>,
    pub data: Vec<u8>,
}

impl NdArray {
    /// Create an array from raw element bytes
    ///
    /// Shape and descriptor are checked against the byte length by the codec
    /// when the value is encoded, see [`NdArray::validate`].
    pub fn new(descr: ElementDescr, shape: Vec<usize>, data: Vec<u8>) -> Self {
        Self { descr, shape, data }
    }

    pub fn from_i64(shape: Vec<usize>, values: &[i64]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ElementDescr::Primitive(I64_DESCR.to_string()), shape, data)
    }

    pub fn from_f64(shape: Vec<usize>, values: &[f64]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ElementDescr::Primitive(F64_DESCR.to_string()), shape, data)
    }

    /// Create a one dimensional record array of `count` elements
    pub fn record(fields: Vec<(String, String)>, count: usize, data: Vec<u8>) -> Self {
        Self::new(ElementDescr::Record(fields), vec![count], data)
    }

    /// Number of elements (product of the shape)
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check that the byte length matches shape and element size
    pub fn validate(&self) -> std::result::Result<(), String> {
        let item = self
            .descr
            .item_size()
            .ok_or_else(|| format!("unrecognized element descriptor {}", self.descr))?;
        let expected = self.element_count() * item;
        if expected != self.data.len() {
            return Err(format!(
                "array of shape {:?} and element {} needs {} bytes, has {}",
                self.shape,
                self.descr,
                expected,
                self.data.len()
            ));
        }
        Ok(())
    }

    /// Elements as i64, if this is an `<i8` array
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        if self.descr != ElementDescr::Primitive(I64_DESCR.to_string()) || self.data.len() % 8 != 0
        {
            return None;
        }
        Some(
            self.data
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect(),
        )
    }

    /// Elements as f64, if this is an `<f8` array
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        if self.descr != ElementDescr::Primitive(F64_DESCR.to_string()) || self.data.len() % 8 != 0
        {
            return None;
        }
        Some(
            self.data
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes(c.try_into().unwrap_or([0; 8])))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_sizes() {
        assert_eq!(ElementDescr::Primitive("<i8".into()).item_size(), Some(8));
        assert_eq!(ElementDescr::Primitive("|b1".into()).item_size(), Some(1));
        assert_eq!(ElementDescr::Primitive("<U3".into()).item_size(), Some(12));
        assert_eq!(ElementDescr::Primitive("<x3".into()).item_size(), None);
        let rec =
            ElementDescr::Record(vec![("a".into(), "<i4".into()), ("b".into(), "<f8".into())]);
        assert_eq!(rec.item_size(), Some(12));
    }

    #[test]
    fn test_array_validate() {
        let a = NdArray::from_i64(vec![2, 2], &[1, 2, 3, 4]);
        assert!(a.validate().is_ok());
        assert_eq!(a.to_i64_vec(), Some(vec![1, 2, 3, 4]));
        assert_eq!(a.to_f64_vec(), None);

        let bad = NdArray::from_f64(vec![3], &[1.0, 2.0]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_map_lookup() {
        let v = Value::map([("a", Value::Int(1)), ("b", Value::from("x"))]);
        assert_eq!(v.get("b"), Some(&Value::Str("x".into())));
        assert_eq!(v.get("c"), None);
    }
}
