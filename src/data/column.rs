//! Column payloads exchanged with callers

use super::value::{NdArray, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape of the data returned to callers for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Representation {
    /// A plain sequence of [`Value`]s
    Sequence,
    /// A typed, contiguous array
    NativeArray,
}

impl Representation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Representation::Sequence => "sequence",
            Representation::NativeArray => "native-array",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Representation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequence" => Ok(Representation::Sequence),
            "native-array" => Ok(Representation::NativeArray),
            other => Err(format!("unknown representation: {}", other)),
        }
    }
}

/// Typed, contiguous column data
///
/// Numeric arrays carry a full shape whose first dimension is the row count;
/// a column of 3-vectors has shape `[rows, 3]` and `rows * 3` elements.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedArray {
    Int64 { data: Vec<i64>, shape: Vec<usize> },
    Float64 { data: Vec<f64>, shape: Vec<usize> },
    Text(Vec<String>),
}

impl TypedArray {
    pub fn int64(data: Vec<i64>) -> Self {
        let shape = vec![data.len()];
        TypedArray::Int64 { data, shape }
    }

    pub fn float64(data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        TypedArray::Float64 { data, shape }
    }

    pub fn text<S: Into<String>>(data: impl IntoIterator<Item = S>) -> Self {
        TypedArray::Text(data.into_iter().map(Into::into).collect())
    }

    /// Multi-dimensional int64 array, `shape[0]` is the row count
    pub fn int64_shaped(data: Vec<i64>, shape: Vec<usize>) -> Result<Self, String> {
        check_shape(data.len(), &shape)?;
        Ok(TypedArray::Int64 { data, shape })
    }

    /// Multi-dimensional float64 array, `shape[0]` is the row count
    pub fn float64_shaped(data: Vec<f64>, shape: Vec<usize>) -> Result<Self, String> {
        check_shape(data.len(), &shape)?;
        Ok(TypedArray::Float64 { data, shape })
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        match self {
            TypedArray::Int64 { shape, .. } | TypedArray::Float64 { shape, .. } => {
                shape.first().copied().unwrap_or(0)
            }
            TypedArray::Text(v) => v.len(),
        }
    }

    /// Shape of one row (empty for scalar columns)
    pub fn inner_shape(&self) -> &[usize] {
        match self {
            TypedArray::Int64 { shape, .. } | TypedArray::Float64 { shape, .. } => {
                shape.get(1..).unwrap_or(&[])
            }
            TypedArray::Text(_) => &[],
        }
    }

    /// Convert into one [`Value`] per row
    ///
    /// Multi-dimensional rows become nested lists.
    pub fn into_values(self) -> Vec<Value> {
        let inner: Vec<usize> = self.inner_shape().to_vec();
        match self {
            TypedArray::Int64 { data, .. } => rows_to_values(data, &inner, Value::Int),
            TypedArray::Float64 { data, .. } => rows_to_values(data, &inner, Value::Float),
            TypedArray::Text(v) => v.into_iter().map(Value::Str).collect(),
        }
    }

    /// The row at `index` as a standalone value
    ///
    /// Multi-dimensional numeric rows become an [`NdArray`] of the inner shape.
    pub fn row_value(&self, index: usize) -> Option<Value> {
        let inner = self.inner_shape();
        let width: usize = inner.iter().product();
        match self {
            TypedArray::Int64 { data, .. } if inner.is_empty() => {
                data.get(index).map(|v| Value::Int(*v))
            }
            TypedArray::Float64 { data, .. } if inner.is_empty() => {
                data.get(index).map(|v| Value::Float(*v))
            }
            TypedArray::Int64 { data, .. } => data
                .get(index * width..(index + 1) * width)
                .map(|row| Value::Array(NdArray::from_i64(inner.to_vec(), row))),
            TypedArray::Float64 { data, .. } => data
                .get(index * width..(index + 1) * width)
                .map(|row| Value::Array(NdArray::from_f64(inner.to_vec(), row))),
            TypedArray::Text(v) => v.get(index).map(|s| Value::Str(s.clone())),
        }
    }
}

fn check_shape(len: usize, shape: &[usize]) -> Result<(), String> {
    if shape.is_empty() {
        return Err("shape must have at least one dimension".to_string());
    }
    let expected: usize = shape.iter().product();
    if expected != len {
        return Err(format!("shape {:?} needs {} elements, got {}", shape, expected, len));
    }
    Ok(())
}

/// Split flat row-major data into nested lists following `inner`
fn rows_to_values<T: Copy>(data: Vec<T>, inner: &[usize], wrap: fn(T) -> Value) -> Vec<Value> {
    if inner.is_empty() {
        return data.into_iter().map(wrap).collect();
    }
    let width: usize = inner.iter().product();
    if width == 0 {
        return Vec::new();
    }
    data.chunks(width).map(|row| nest(row, inner, wrap)).collect()
}

fn nest<T: Copy>(flat: &[T], dims: &[usize], wrap: fn(T) -> Value) -> Value {
    match dims {
        [] | [_] => Value::List(flat.iter().map(|v| wrap(*v)).collect()),
        [_, rest @ ..] => {
            let step: usize = rest.iter().product();
            Value::List(flat.chunks(step.max(1)).map(|c| nest(c, rest, wrap)).collect())
        }
    }
}

/// Column values, as passed to append/update and returned by reads
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Sequence(Vec<Value>),
    Array(TypedArray),
}

impl ColumnData {
    /// Number of rows
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Sequence(v) => v.len(),
            ColumnData::Array(a) => a.rows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn representation(&self) -> Representation {
        match self {
            ColumnData::Sequence(_) => Representation::Sequence,
            ColumnData::Array(_) => Representation::NativeArray,
        }
    }

    /// Values as a sequence, converting typed arrays row by row
    pub fn into_values(self) -> Vec<Value> {
        match self {
            ColumnData::Sequence(v) => v,
            ColumnData::Array(a) => a.into_values(),
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            ColumnData::Sequence(v) => Some(v),
            ColumnData::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&TypedArray> {
        match self {
            ColumnData::Array(a) => Some(a),
            ColumnData::Sequence(_) => None,
        }
    }

    /// Integer values of a scalar int column in either representation
    pub fn to_i64s(&self) -> Option<Vec<i64>> {
        match self {
            ColumnData::Sequence(v) => v.iter().map(Value::as_int).collect(),
            ColumnData::Array(TypedArray::Int64 { data, shape }) if shape.len() == 1 => {
                Some(data.clone())
            }
            ColumnData::Array(_) => None,
        }
    }

    /// Text values of a text column in either representation
    pub fn to_strings(&self) -> Option<Vec<String>> {
        match self {
            ColumnData::Sequence(v) => v.iter().map(|x| x.as_str().map(str::to_string)).collect(),
            ColumnData::Array(TypedArray::Text(v)) => Some(v.clone()),
            ColumnData::Array(_) => None,
        }
    }
}

impl From<TypedArray> for ColumnData {
    fn from(a: TypedArray) -> Self {
        ColumnData::Array(a)
    }
}

impl From<Vec<Value>> for ColumnData {
    fn from(v: Vec<Value>) -> Self {
        ColumnData::Sequence(v)
    }
}

impl From<Vec<i64>> for ColumnData {
    fn from(v: Vec<i64>) -> Self {
        ColumnData::Sequence(v.into_iter().map(Value::Int).collect())
    }
}

impl From<Vec<f64>> for ColumnData {
    fn from(v: Vec<f64>) -> Self {
        ColumnData::Sequence(v.into_iter().map(Value::Float).collect())
    }
}

impl From<Vec<&str>> for ColumnData {
    fn from(v: Vec<&str>) -> Self {
        ColumnData::Sequence(v.into_iter().map(Value::from).collect())
    }
}

impl From<Vec<String>> for ColumnData {
    fn from(v: Vec<String>) -> Self {
        ColumnData::Sequence(v.into_iter().map(Value::Str).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shaped_rows() {
        let a = TypedArray::int64_shaped(vec![1, 2, 3, 4, 5, 6], vec![2, 3]).unwrap();
        assert_eq!(a.rows(), 2);
        assert_eq!(a.inner_shape(), &[3]);
        assert_eq!(
            a.row_value(1),
            Some(Value::Array(NdArray::from_i64(vec![3], &[4, 5, 6])))
        );
        let values = a.into_values();
        assert_eq!(values[0], Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));

        assert!(TypedArray::float64_shaped(vec![1.0; 5], vec![2, 3]).is_err());
    }

    #[test]
    fn test_column_data_conversions() {
        let c = ColumnData::from(vec![1i64, 2, 3]);
        assert_eq!(c.len(), 3);
        assert_eq!(c.representation(), Representation::Sequence);
        assert_eq!(c.to_i64s(), Some(vec![1, 2, 3]));

        let t = ColumnData::from(TypedArray::text(["a", "b"]));
        assert_eq!(t.representation(), Representation::NativeArray);
        assert_eq!(t.to_strings(), Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_representation_strings() {
        for r in [Representation::Sequence, Representation::NativeArray] {
            assert_eq!(r.as_str().parse::<Representation>().unwrap(), r);
        }
        assert!("python".parse::<Representation>().is_err());
    }
}
