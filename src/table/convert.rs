//! Conversion between caller column data and backend cells

use crate::data::codec;
use crate::data::{ColumnData, NdArray, Representation, TypedArray, Value};
use crate::storage::Cells;
use crate::{Result, ValidationError};

use super::schema::ColumnDtype;

/// Column data encoded for one backend array
#[derive(Debug, Clone)]
pub(crate) struct EncodedColumn {
    pub cells: Cells,
    pub rows: usize,
    /// Longest byte cell, 0 for numeric columns
    pub longest: usize,
}

impl EncodedColumn {
    /// Repeat a single encoded row `times` times
    pub fn broadcast(self, times: usize) -> Self {
        let cells = match self.cells {
            Cells::Int64(v) => Cells::Int64(v.repeat(times)),
            Cells::Float64(v) => Cells::Float64(v.repeat(times)),
            Cells::Bytes(v) => {
                Cells::Bytes(v.iter().cycle().take(v.len() * times).cloned().collect())
            }
        };
        Self {
            cells,
            rows: self.rows * times,
            longest: self.longest,
        }
    }
}

fn invalid(column: &str, msg: impl std::fmt::Display) -> ValidationError {
    ValidationError::InvalidArgument(format!("column {}: {}", column, msg))
}

/// Encode caller data into cells for a column of `dtype` with row shape `inner`
pub(crate) fn encode_column(
    column: &str,
    dtype: ColumnDtype,
    inner: &[usize],
    data: &ColumnData,
) -> Result<EncodedColumn> {
    let rows = data.len();
    let row_width: usize = inner.iter().product();

    if let ColumnData::Array(array) = data {
        if dtype.is_numeric() && array.inner_shape() != inner {
            return Err(invalid(
                column,
                format!(
                    "row shape {:?} does not match column shape {:?}",
                    array.inner_shape(),
                    inner
                ),
            )
            .into());
        }
    }

    let (cells, longest) = match dtype {
        ColumnDtype::Int64 => {
            let values = match data {
                ColumnData::Array(TypedArray::Int64 { data, .. }) => data.clone(),
                ColumnData::Array(other) => {
                    let message = format!("cannot store {} array as int64", array_kind(other));
                    return Err(invalid(column, message).into());
                }
                ColumnData::Sequence(values) => flatten_ints(column, values, inner)?,
            };
            (Cells::Int64(values), 0)
        }
        ColumnDtype::Float64 => {
            let values = match data {
                ColumnData::Array(TypedArray::Float64 { data, .. }) => data.clone(),
                ColumnData::Array(TypedArray::Int64 { data, .. }) => {
                    data.iter().map(|v| *v as f64).collect()
                }
                ColumnData::Array(other) => {
                    let message = format!("cannot store {} array as float64", array_kind(other));
                    return Err(invalid(column, message).into());
                }
                ColumnData::Sequence(values) => flatten_floats(column, values, inner)?,
            };
            (Cells::Float64(values), 0)
        }
        ColumnDtype::FixedText(_) => {
            let bytes: Vec<Vec<u8>> = match data {
                ColumnData::Array(TypedArray::Text(strings)) => {
                    strings.iter().map(|s| s.as_bytes().to_vec()).collect()
                }
                ColumnData::Array(other) => {
                    let message = format!("cannot store {} array as text", array_kind(other));
                    return Err(invalid(column, message).into());
                }
                ColumnData::Sequence(values) => values
                    .iter()
                    .map(|v| match v {
                        Value::Str(s) => Ok(s.as_bytes().to_vec()),
                        other => {
                            let message = format!("expected str, got {}", other.type_name());
                            Err(invalid(column, message))
                        }
                    })
                    .collect::<std::result::Result<_, _>>()?,
            };
            let longest = bytes.iter().map(Vec::len).max().unwrap_or(0);
            (Cells::Bytes(bytes), longest)
        }
        ColumnDtype::Object { compressed, .. } => {
            let values = data.clone().into_values();
            let blobs = values
                .iter()
                .map(|v| codec::encode(v, compressed))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let longest = blobs.iter().map(Vec::len).max().unwrap_or(0);
            (Cells::Bytes(blobs), longest)
        }
    };

    if dtype.is_numeric() && cells.len() != rows * row_width {
        return Err(invalid(
            column,
            format!("{} elements do not fill {} rows of shape {:?}", cells.len(), rows, inner),
        )
        .into());
    }
    Ok(EncodedColumn { cells, rows, longest })
}

fn array_kind(a: &TypedArray) -> &'static str {
    match a {
        TypedArray::Int64 { .. } => "int64",
        TypedArray::Float64 { .. } => "float64",
        TypedArray::Text(_) => "text",
    }
}

fn flatten_ints(column: &str, values: &[Value], inner: &[usize]) -> Result<Vec<i64>> {
    let mut out = Vec::with_capacity(values.len() * inner.iter().product::<usize>());
    for v in values {
        push_ints(column, v, inner, &mut out)?;
    }
    Ok(out)
}

fn push_ints(column: &str, value: &Value, dims: &[usize], out: &mut Vec<i64>) -> Result<()> {
    match (value, dims) {
        (Value::Int(i), []) => out.push(*i),
        (Value::List(items), [n, rest @ ..]) if items.len() == *n => {
            for item in items {
                push_ints(column, item, rest, out)?;
            }
        }
        (Value::Array(a), _) if a.shape == dims => {
            let ints = a
                .to_i64_vec()
                .ok_or_else(|| invalid(column, format!("array of {} is not int64", a.descr)))?;
            out.extend(ints);
        }
        (other, _) => {
            return Err(invalid(
                column,
                format!("value {} does not fit an int64 row of shape {:?}", other, dims),
            )
            .into())
        }
    }
    Ok(())
}

fn flatten_floats(column: &str, values: &[Value], inner: &[usize]) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(values.len() * inner.iter().product::<usize>());
    for v in values {
        push_floats(column, v, inner, &mut out)?;
    }
    Ok(out)
}

fn push_floats(column: &str, value: &Value, dims: &[usize], out: &mut Vec<f64>) -> Result<()> {
    match (value, dims) {
        (Value::Int(_) | Value::Float(_), []) => out.extend(value.as_float()),
        (Value::List(items), [n, rest @ ..]) if items.len() == *n => {
            for item in items {
                push_floats(column, item, rest, out)?;
            }
        }
        (Value::Array(a), _) if a.shape == dims => {
            let floats = a
                .to_f64_vec()
                .or_else(|| a.to_i64_vec().map(|v| v.into_iter().map(|x| x as f64).collect()))
                .ok_or_else(|| invalid(column, format!("array of {} is not numeric", a.descr)))?;
            out.extend(floats);
        }
        (other, _) => {
            return Err(invalid(
                column,
                format!("value {} does not fit a float64 row of shape {:?}", other, dims),
            )
            .into())
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

fn full_shape(rows: usize, inner: &[usize]) -> Vec<usize> {
    let mut shape = Vec::with_capacity(inner.len() + 1);
    shape.push(rows);
    shape.extend_from_slice(inner);
    shape
}

fn text_cells(cells: Vec<Vec<u8>>) -> Result<Vec<String>> {
    cells
        .into_iter()
        .map(|b| String::from_utf8(b).map_err(|e| codec::CodecError::from(e).into()))
        .collect()
}

/// Decode backend cells into caller data
///
/// Object columns always come back as a sequence.
pub(crate) fn decode_column(
    dtype: ColumnDtype,
    inner: &[usize],
    cells: Cells,
    representation: Representation,
) -> Result<ColumnData> {
    let row_width: usize = inner.iter().product();
    let typed = match (dtype, cells) {
        (ColumnDtype::Int64, Cells::Int64(data)) => {
            let rows = if row_width == 0 { 0 } else { data.len() / row_width };
            TypedArray::Int64 { data, shape: full_shape(rows, inner) }
        }
        (ColumnDtype::Float64, Cells::Float64(data)) => {
            let rows = if row_width == 0 { 0 } else { data.len() / row_width };
            TypedArray::Float64 { data, shape: full_shape(rows, inner) }
        }
        (ColumnDtype::FixedText(_), Cells::Bytes(cells)) => TypedArray::Text(text_cells(cells)?),
        (ColumnDtype::Object { compressed, .. }, Cells::Bytes(cells)) => {
            let values = cells
                .iter()
                .map(|b| codec::decode(b, compressed))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(ColumnData::Sequence(values));
        }
        (dtype, cells) => {
            return Err(crate::ColStoreError::CorruptionRisk(format!(
                "{} cells stored in a column of dtype {}",
                cells.kind(),
                dtype
            )))
        }
    };
    Ok(match representation {
        Representation::NativeArray => ColumnData::Array(typed),
        Representation::Sequence => ColumnData::Sequence(typed.into_values()),
    })
}

// ============================================================================
// Column iteration
// ============================================================================

/// Iterator over the decoded values of one column, in row order
///
/// Multi-dimensional numeric rows come back as [`Value::Array`] under the
/// native-array representation and as nested lists otherwise.
pub struct ColumnIter {
    dtype: ColumnDtype,
    inner: Vec<usize>,
    cells: Cells,
    representation: Representation,
    pos: usize,
    rows: usize,
}

impl ColumnIter {
    pub(crate) fn new(
        dtype: ColumnDtype,
        inner: Vec<usize>,
        cells: Cells,
        representation: Representation,
    ) -> Self {
        let rows = cells.rows(inner.iter().product());
        Self {
            dtype,
            inner,
            cells,
            representation,
            pos: 0,
            rows,
        }
    }

    pub fn dtype(&self) -> ColumnDtype {
        self.dtype
    }

    fn decode_row(&self, row: usize) -> Result<Value> {
        let width: usize = self.inner.iter().product();
        let value = match &self.cells {
            Cells::Int64(data) if self.inner.is_empty() => Value::Int(data[row]),
            Cells::Float64(data) if self.inner.is_empty() => Value::Float(data[row]),
            Cells::Int64(data) => {
                let cells = &data[row * width..(row + 1) * width];
                let array = NdArray::from_i64(self.inner.clone(), cells);
                self.shape_row(Value::Array(array))
            }
            Cells::Float64(data) => {
                let cells = &data[row * width..(row + 1) * width];
                let array = NdArray::from_f64(self.inner.clone(), cells);
                self.shape_row(Value::Array(array))
            }
            Cells::Bytes(data) => match self.dtype {
                ColumnDtype::Object { compressed, .. } => codec::decode(&data[row], compressed)?,
                _ => {
                    let text =
                        String::from_utf8(data[row].clone()).map_err(codec::CodecError::from)?;
                    Value::Str(text)
                }
            },
        };
        Ok(value)
    }

    fn shape_row(&self, row: Value) -> Value {
        match (self.representation, row) {
            (Representation::NativeArray, row) => row,
            (Representation::Sequence, Value::Array(a)) => {
                let typed = match (a.to_i64_vec(), a.to_f64_vec()) {
                    (Some(ints), _) => TypedArray::Int64 {
                        data: ints,
                        shape: full_shape(1, &a.shape),
                    },
                    (None, Some(floats)) => TypedArray::Float64 {
                        data: floats,
                        shape: full_shape(1, &a.shape),
                    },
                    (None, None) => return Value::Array(a),
                };
                typed.into_values().pop().unwrap_or(Value::Nil)
            }
            (_, row) => row,
        }
    }
}

impl Iterator for ColumnIter {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.rows {
            return None;
        }
        let row = self.pos;
        self.pos += 1;
        Some(self.decode_row(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.rows - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ColumnIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_and_objects() {
        let data = ColumnData::from(vec!["ab", "c"]);
        let enc = encode_column("t", ColumnDtype::FixedText(1), &[], &data).unwrap();
        assert_eq!(enc.longest, 2);
        assert_eq!(enc.rows, 2);

        let objs = ColumnData::Sequence(vec![Value::List(vec![Value::Int(0)])]);
        let dtype = ColumnDtype::Object { width: 64, compressed: true };
        let enc = encode_column("o", dtype, &[], &objs).unwrap();
        let back = decode_column(dtype, &[], enc.cells, Representation::NativeArray).unwrap();
        assert_eq!(back, objs);
    }

    #[test]
    fn test_encode_rejects_wrong_types() {
        let text = ColumnData::from(vec!["x"]);
        assert!(encode_column("c", ColumnDtype::Int64, &[], &text).is_err());

        let floats = ColumnData::from(vec![1.5]);
        assert!(encode_column("c", ColumnDtype::Int64, &[], &floats).is_err());

        let ints = ColumnData::from(vec![1i64, 2]);
        let enc = encode_column("c", ColumnDtype::Float64, &[], &ints).unwrap();
        assert_eq!(enc.cells, Cells::Float64(vec![1.0, 2.0]));
    }

    #[test]
    fn test_shaped_numeric() {
        let data = ColumnData::Sequence(vec![
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::Array(NdArray::from_i64(vec![2], &[3, 4])),
        ]);
        let enc = encode_column("v", ColumnDtype::Int64, &[2], &data).unwrap();
        assert_eq!(enc.cells, Cells::Int64(vec![1, 2, 3, 4]));

        let arr =
            decode_column(ColumnDtype::Int64, &[2], enc.cells.clone(), Representation::NativeArray)
                .unwrap();
        assert_eq!(arr.as_array().unwrap().rows(), 2);

        let mut iter =
            ColumnIter::new(ColumnDtype::Int64, vec![2], enc.cells, Representation::NativeArray);
        assert_eq!(iter.len(), 2);
        assert_eq!(
            iter.nth(1).unwrap().unwrap(),
            Value::Array(NdArray::from_i64(vec![2], &[3, 4]))
        );

        let bad = ColumnData::Sequence(vec![Value::List(vec![Value::Int(1)])]);
        assert!(encode_column("v", ColumnDtype::Int64, &[2], &bad).is_err());
    }

    #[test]
    fn test_broadcast() {
        let column = ColumnData::from(vec!["w"]);
        let enc = encode_column("c", ColumnDtype::FixedText(4), &[], &column).unwrap();
        let wide = enc.broadcast(3);
        assert_eq!(wide.rows, 3);
        assert_eq!(wide.cells, Cells::Bytes(vec![b"w".to_vec(); 3]));
    }
}
