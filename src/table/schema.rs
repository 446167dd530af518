//! Column dtypes, dtype inference, and persisted table metadata

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::data::codec;
use crate::data::{ColumnData, Representation, TypedArray, Value};
use crate::storage::{ArrayBackend, Atom};
use crate::{ColStoreError, NodeKind, Result, ValidationError};

/// Attribute on the table node holding the encoded [`TableMeta`]
pub const META_ATTR: &str = "_ctable_attrs";

/// Version stamp written into new table metadata
pub const FORMAT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Column dtype
// ============================================================================

/// Physical encoding of a column
///
/// String form: `i`, `f` (or `n`), `s<N>`, `o<N>`, `c<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnDtype {
    Int64,
    Float64,
    /// UTF-8 text, width in bytes
    FixedText(usize),
    /// Codec encoded value, width in bytes; `compressed` adds lz4
    Object { width: usize, compressed: bool },
}

impl ColumnDtype {
    /// Fixed text column wide enough for every string in `strings`
    pub fn text_for<S: AsRef<str>>(strings: &[S]) -> Self {
        ColumnDtype::FixedText(codec::longest_text_len(strings).max(1))
    }

    /// Object column wide enough for every encoded value in `values`
    pub fn object_for(values: &[Value], compressed: bool) -> Result<Self> {
        let width = codec::longest_encoded_len(values, compressed)?.max(1);
        Ok(ColumnDtype::Object { width, compressed })
    }

    /// Byte width of variable-content columns
    pub fn width(&self) -> Option<usize> {
        match self {
            ColumnDtype::FixedText(w) | ColumnDtype::Object { width: w, .. } => Some(*w),
            ColumnDtype::Int64 | ColumnDtype::Float64 => None,
        }
    }

    /// Same dtype with a new byte width (numeric dtypes are unchanged)
    pub fn with_width(self, width: usize) -> Self {
        match self {
            ColumnDtype::FixedText(_) => ColumnDtype::FixedText(width),
            ColumnDtype::Object { compressed, .. } => ColumnDtype::Object { width, compressed },
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnDtype::Int64 | ColumnDtype::Float64)
    }

    /// Backend element type
    pub fn atom(&self) -> Atom {
        match self {
            ColumnDtype::Int64 => Atom::Int64,
            ColumnDtype::Float64 => Atom::Float64,
            ColumnDtype::FixedText(w) | ColumnDtype::Object { width: w, .. } => {
                Atom::FixedBytes(*w)
            }
        }
    }
}

impl fmt::Display for ColumnDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDtype::Int64 => write!(f, "i"),
            ColumnDtype::Float64 => write!(f, "f"),
            ColumnDtype::FixedText(w) => write!(f, "s{}", w),
            ColumnDtype::Object { width, compressed: false } => write!(f, "o{}", width),
            ColumnDtype::Object { width, compressed: true } => write!(f, "c{}", width),
        }
    }
}

impl FromStr for ColumnDtype {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let invalid = || ValidationError::InvalidDtype(s.to_string());
        match lower.as_str() {
            "i" => return Ok(ColumnDtype::Int64),
            "f" | "n" => return Ok(ColumnDtype::Float64),
            _ => {}
        }

        let mut chars = lower.chars();
        let kind = chars.next().ok_or_else(invalid)?;
        let width: usize = chars.as_str().parse().map_err(|_| invalid())?;
        if width == 0 {
            return Err(invalid());
        }
        match kind {
            's' => Ok(ColumnDtype::FixedText(width)),
            'o' => Ok(ColumnDtype::Object { width, compressed: false }),
            'c' => Ok(ColumnDtype::Object { width, compressed: true }),
            _ => Err(invalid()),
        }
    }
}

// ============================================================================
// Inference
// ============================================================================

/// Infer a dtype from column data
///
/// Typed arrays map directly. Sequences are typed by their first element:
/// strings become text sized to the longest value, integers become int64
/// unless a float is present, structured values become uncompressed objects
/// sized to the longest encoded blob.
pub fn infer_dtype(column: &str, data: &ColumnData) -> Result<ColumnDtype> {
    match data {
        ColumnData::Array(TypedArray::Int64 { .. }) => Ok(ColumnDtype::Int64),
        ColumnData::Array(TypedArray::Float64 { .. }) => Ok(ColumnDtype::Float64),
        ColumnData::Array(TypedArray::Text(strings)) => Ok(ColumnDtype::text_for(strings)),
        ColumnData::Sequence(values) => {
            let first = values.first().ok_or_else(|| {
                let message = format!("cannot infer dtype of empty column {}", column);
                ValidationError::InvalidDtype(message)
            })?;
            match first {
                Value::Str(_) => {
                    let strings: Vec<&str> = values.iter().filter_map(Value::as_str).collect();
                    Ok(ColumnDtype::text_for(&strings))
                }
                Value::Int(_) => {
                    if values.iter().any(|v| matches!(v, Value::Float(_))) {
                        Ok(ColumnDtype::Float64)
                    } else {
                        Ok(ColumnDtype::Int64)
                    }
                }
                Value::Float(_) => Ok(ColumnDtype::Float64),
                Value::List(_) | Value::Map(_) | Value::Bytes(_) | Value::Array(_) => {
                    ColumnDtype::object_for(values, false)
                }
                Value::Nil | Value::Bool(_) => Err(ValidationError::InvalidDtype(format!(
                    "cannot infer dtype of column {} from {} value",
                    column,
                    first.type_name()
                ))
                .into()),
            }
        }
    }
}

/// Row shape of column data (empty for scalar rows)
pub fn inner_shape_of(data: &ColumnData) -> Vec<usize> {
    match data {
        ColumnData::Array(a) => a.inner_shape().to_vec(),
        ColumnData::Sequence(_) => Vec::new(),
    }
}

// ============================================================================
// Table metadata
// ============================================================================

/// Schema and bookkeeping persisted on the table node
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableMeta {
    pub column_dtypes: BTreeMap<String, ColumnDtype>,
    pub column_representations: BTreeMap<String, Representation>,
    pub format_version: String,
}

impl TableMeta {
    pub fn new(column_dtypes: BTreeMap<String, ColumnDtype>) -> Self {
        Self {
            column_dtypes,
            column_representations: BTreeMap::new(),
            format_version: FORMAT_VERSION.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        let dtypes = self
            .column_dtypes
            .iter()
            .map(|(name, dtype)| (Value::from(name.as_str()), Value::from(dtype.to_string())));
        let reprs = self
            .column_representations
            .iter()
            .map(|(name, repr)| (Value::from(name.as_str()), Value::from(repr.as_str())));
        Value::map([
            ("column_dtypes", Value::map(dtypes)),
            ("column_representations", Value::map(reprs)),
            ("format_version", Value::from(self.format_version.as_str())),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let corrupt =
            |what: &str| ColStoreError::CorruptionRisk(format!("table metadata: {}", what));

        let mut meta = TableMeta::default();
        if let Some(Value::Map(pairs)) = value.get("column_dtypes") {
            for (k, v) in pairs {
                let (Some(name), Some(dtype)) = (k.as_str(), v.as_str()) else {
                    return Err(corrupt("non-string dtype entry"));
                };
                meta.column_dtypes.insert(name.to_string(), dtype.parse()?);
            }
        }
        if let Some(Value::Map(pairs)) = value.get("column_representations") {
            for (k, v) in pairs {
                let (Some(name), Some(repr)) = (k.as_str(), v.as_str()) else {
                    return Err(corrupt("non-string representation entry"));
                };
                let repr = repr.parse::<Representation>().map_err(|e| corrupt(&e))?;
                meta.column_representations.insert(name.to_string(), repr);
            }
        }
        meta.format_version = value
            .get("format_version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(meta)
    }

    /// Load the metadata of the table at `path`
    pub fn load<B: ArrayBackend + ?Sized>(file: &B, path: &str) -> Result<Self> {
        if !file.node_exists(path) || file.array_spec(path).is_some() {
            return Err(ColStoreError::not_found(NodeKind::Table, path, file.location()));
        }
        match file.get_attr(path, META_ATTR)? {
            Some(bytes) => Self::from_value(&codec::decode(&bytes, false)?),
            None => Err(ColStoreError::not_found(NodeKind::Table, path, file.location())),
        }
    }

    pub fn save<B: ArrayBackend + ?Sized>(&self, file: &mut B, path: &str) -> Result<()> {
        let bytes = codec::encode(&self.to_value(), false)?;
        file.set_attr(path, META_ATTR, bytes)
    }
}

/// Summary of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub path: String,
    pub dtypes: BTreeMap<String, ColumnDtype>,
    pub representations: BTreeMap<String, Representation>,
    pub nrows: usize,
    pub format_version: String,
}

impl TableInfo {
    pub fn to_json(&self) -> serde_json::Value {
        let dtypes: serde_json::Map<String, serde_json::Value> = self
            .dtypes
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
            .collect();
        let reprs: serde_json::Map<String, serde_json::Value> = self
            .representations
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::json!({
            "path": self.path,
            "nrows": self.nrows,
            "column_dtypes": dtypes,
            "column_representations": reprs,
            "format_version": self.format_version,
        })
    }
}
