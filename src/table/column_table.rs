//! Column table engine
//!
//! A table is a group node holding one backend array per column plus the
//! encoded [`TableMeta`] attribute. The engine keeps no state between calls:
//! every operation loads the metadata, works on the arrays, and persists any
//! schema change before returning.
//!
//! All columns of a table have the same length. Appends record every
//! column's length up front and truncate back to it when any column write
//! fails.

use std::collections::BTreeMap;

use crate::data::{ColumnData, Representation};
use crate::query::{ColumnBuffer, CompiledPredicate, Query};
use crate::storage::{join_path, ArrayBackend, ArraySpec, Atom, Cells};
use crate::{ColStoreError, NodeKind, Result, ValidationError};

use super::compaction::plan_removal;
use super::convert::{decode_column, encode_column, ColumnIter, EncodedColumn};
use super::schema::{infer_dtype, inner_shape_of, ColumnDtype, TableInfo, TableMeta, META_ATTR};
use super::{ReadOptions, RowSelection};

/// Column data keyed by column name
pub type ColumnMap = BTreeMap<String, ColumnData>;

/// Engine bound to one table path of an open backend
pub struct ColumnTable<'f, B: ArrayBackend + ?Sized> {
    file: &'f mut B,
    path: String,
}

impl<'f, B: ArrayBackend + ?Sized> ColumnTable<'f, B> {
    pub fn new(file: &'f mut B, path: &str) -> Self {
        Self {
            file,
            path: crate::storage::norm_path(path),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when the path holds a group carrying table metadata
    pub fn exists(&self) -> bool {
        self.file.array_spec(&self.path).is_none()
            && matches!(self.file.get_attr(&self.path, META_ATTR), Ok(Some(_)))
    }

    pub fn meta(&self) -> Result<TableMeta> {
        TableMeta::load(&*self.file, &self.path)
    }

    fn column_path(&self, name: &str) -> String {
        join_path(&self.path, name)
    }

    fn column_not_found(&self, name: &str) -> ColStoreError {
        ColStoreError::not_found(NodeKind::Column, self.column_path(name), self.file.location())
    }

    fn column_spec(&self, name: &str) -> Result<ArraySpec> {
        self.file
            .array_spec(&self.column_path(name))
            .ok_or_else(|| self.column_not_found(name))
    }

    fn column_dtype(&self, meta: &TableMeta, name: &str) -> Result<ColumnDtype> {
        meta.column_dtypes
            .get(name)
            .copied()
            .ok_or_else(|| self.column_not_found(name))
    }

    // ========================================================================
    // Shape
    // ========================================================================

    /// Number of rows, checked across every column
    pub fn row_count(&self) -> Result<usize> {
        let meta = self.meta()?;
        self.row_count_of(&meta)
    }

    fn row_count_of(&self, meta: &TableMeta) -> Result<usize> {
        let mut first: Option<(&str, usize)> = None;
        for name in meta.column_dtypes.keys() {
            let len = self.file.array_len(&self.column_path(name))?;
            match first {
                None => first = Some((name.as_str(), len)),
                Some((first_name, first_len)) if first_len != len => {
                    return Err(ColStoreError::CorruptionRisk(format!(
                        "column {} has {} rows but column {} has {} in table {} of {}",
                        name,
                        len,
                        first_name,
                        first_len,
                        self.path,
                        self.file.location()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(first.map_or(0, |(_, len)| len))
    }

    pub fn info(&self) -> Result<TableInfo> {
        let meta = self.meta()?;
        let nrows = self.row_count_of(&meta)?;
        Ok(TableInfo {
            path: self.path.clone(),
            dtypes: meta.column_dtypes,
            representations: meta.column_representations,
            nrows,
            format_version: meta.format_version,
        })
    }

    // ========================================================================
    // Create / drop
    // ========================================================================

    /// Create the table group and one empty array per column
    pub fn create(
        &mut self,
        dtypes: &BTreeMap<String, ColumnDtype>,
        shapes: &BTreeMap<String, Vec<usize>>,
        expected_rows: usize,
    ) -> Result<()> {
        if dtypes.is_empty() {
            return Err(ValidationError::InvalidArgument(format!(
                "table {} needs at least one column",
                self.path
            ))
            .into());
        }
        for (name, dtype) in dtypes {
            check_column_name(name)?;
            check_dtype(name, *dtype, shapes.get(name).map_or(&[][..], Vec::as_slice))?;
        }
        if self.path == "/" {
            return Err(ValidationError::InvalidArgument(
                "the root group cannot hold a table".to_string(),
            )
            .into());
        }
        if self.file.node_exists(&self.path) {
            return Err(ColStoreError::AlreadyExists {
                kind: if self.exists() { NodeKind::Table } else { NodeKind::Node },
                name: self.path.clone(),
                file: self.file.location().to_string(),
            });
        }

        self.file.create_group(&self.path)?;
        if let Err(e) = self.create_columns(dtypes, shapes, expected_rows) {
            if let Err(cleanup) = self.file.remove_node(&self.path, true) {
                log::error!("Failed to remove partially created table {}: {}", self.path, cleanup);
            }
            return Err(e);
        }
        log::debug!("Created table {} with {} columns", self.path, dtypes.len());
        Ok(())
    }

    fn create_columns(
        &mut self,
        dtypes: &BTreeMap<String, ColumnDtype>,
        shapes: &BTreeMap<String, Vec<usize>>,
        expected_rows: usize,
    ) -> Result<()> {
        for (name, dtype) in dtypes {
            let inner = shapes.get(name).cloned().unwrap_or_default();
            let spec = ArraySpec::new(dtype.atom())
                .with_inner_shape(inner)
                .with_chunk_rows(expected_rows);
            let col_path = self.column_path(name);
            self.file.create_array(&col_path, spec)?;
        }
        TableMeta::new(dtypes.clone()).save(&mut *self.file, &self.path)
    }

    /// Remove the table and all of its columns
    pub fn drop_table(&mut self) -> Result<()> {
        if !self.exists() {
            let location = self.file.location();
            return Err(ColStoreError::not_found(NodeKind::Table, self.path.clone(), location));
        }
        self.file.remove_node(&self.path, true)
    }

    // ========================================================================
    // Append
    // ========================================================================

    /// Append rows to every column of the table, creating it when absent
    ///
    /// Without `dtypes`, a missing table gets dtypes inferred from `data`.
    pub fn append(
        &mut self,
        data: &ColumnMap,
        dtypes: Option<&BTreeMap<String, ColumnDtype>>,
        allow_resize: bool,
        expected_rows: usize,
    ) -> Result<()> {
        common_length(data)?;
        if self.exists() {
            return self.append_rows(data, allow_resize);
        }
        if self.path == "/" || self.file.node_exists(&self.path) {
            return Err(ValidationError::InvalidArgument(format!(
                "{} in {} is not a table",
                self.path,
                self.file.location()
            ))
            .into());
        }

        let shapes: BTreeMap<String, Vec<usize>> = data
            .iter()
            .map(|(name, col)| (name.clone(), inner_shape_of(col)))
            .collect();
        match dtypes {
            Some(dtypes) => {
                self.create(dtypes, &shapes, expected_rows)?;
                self.append_rows(data, allow_resize)
            }
            None => {
                let mut inferred = BTreeMap::new();
                for (name, col) in data {
                    inferred.insert(name.clone(), infer_dtype(name, col)?);
                }
                self.create(&inferred, &shapes, expected_rows)?;
                if let Err(e) = self.append_rows(data, allow_resize) {
                    if let Err(cleanup) = self.file.remove_node(&self.path, true) {
                        log::error!(
                            "Failed to remove table {} after failed fill: {}",
                            self.path,
                            cleanup
                        );
                    }
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    fn append_rows(&mut self, data: &ColumnMap, allow_resize: bool) -> Result<()> {
        let mut meta = self.meta()?;
        let missing: Vec<String> = meta
            .column_dtypes
            .keys()
            .filter(|name| !data.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingColumn {
                table: self.path.clone(),
                missing,
            }
            .into());
        }
        for extra in data.keys().filter(|name| !meta.column_dtypes.contains_key(*name)) {
            log::warn!("Column {} is not part of table {}, ignored", extra, self.path);
        }

        let names: Vec<String> = meta.column_dtypes.keys().cloned().collect();
        let mut before = Vec::with_capacity(names.len());
        for name in &names {
            before.push(self.file.array_len(&self.column_path(name))?);
        }
        if before.windows(2).any(|w| w[0] != w[1]) {
            return Err(ColStoreError::CorruptionRisk(format!(
                "columns of table {} have unequal lengths {:?}",
                self.path, before
            )));
        }

        if let Err(e) = self.append_all(&mut meta, &names, data, allow_resize) {
            self.rollback(&names, &before);
            return Err(e);
        }
        Ok(())
    }

    fn append_all(
        &mut self,
        meta: &mut TableMeta,
        names: &[String],
        data: &ColumnMap,
        allow_resize: bool,
    ) -> Result<()> {
        for name in names {
            let column = &data[name];
            let spec = self.column_spec(name)?;
            let dtype = self.column_dtype(meta, name)?;
            let encoded = encode_column(name, dtype, &spec.inner_shape, column)?;
            self.ensure_width(meta, name, encoded.longest, allow_resize)?;
            let col_path = self.column_path(name);
            self.file.append(&col_path, &encoded.cells)?;
        }

        let mut recorded = false;
        for name in names {
            if !meta.column_representations.contains_key(name) {
                meta.column_representations
                    .insert(name.clone(), data[name].representation());
                recorded = true;
            }
        }
        if recorded {
            meta.save(&mut *self.file, &self.path)?;
        }
        Ok(())
    }

    /// Truncate every column back to its length before a failed append
    fn rollback(&mut self, names: &[String], before: &[usize]) {
        for (name, &len) in names.iter().zip(before) {
            let col_path = self.column_path(name);
            match self.file.array_len(&col_path) {
                Ok(now) if now > len => {
                    log::debug!("Rolling back {} from {} to {} rows", col_path, now, len);
                    if let Err(e) = self.file.truncate(&col_path, len) {
                        log::error!("Rollback of {} failed: {}", col_path, e);
                    }
                }
                Ok(_) => {}
                Err(e) => log::error!("Rollback of {} failed: {}", col_path, e),
            }
        }
    }

    // ========================================================================
    // Widening
    // ========================================================================

    fn overflow(&self, name: &str, len: usize, width: usize) -> ColStoreError {
        ColStoreError::Overflow {
            column: self.column_path(name),
            len,
            width,
            file: self.file.location().to_string(),
        }
    }

    /// Make sure column `name` can hold a cell of `longest` bytes
    fn ensure_width(
        &mut self,
        meta: &mut TableMeta,
        name: &str,
        longest: usize,
        allow_resize: bool,
    ) -> Result<()> {
        let dtype = self.column_dtype(meta, name)?;
        let Some(width) = dtype.width() else {
            return Ok(());
        };
        if longest <= width {
            return Ok(());
        }
        if !allow_resize {
            return Err(self.overflow(name, longest, width));
        }
        self.widen_column(name, longest)?;
        meta.column_dtypes.insert(name.to_string(), dtype.with_width(longest));
        meta.save(&mut *self.file, &self.path)
    }

    /// Rewrite a byte column into a wider array
    ///
    /// Copies every existing row, so the cost grows with the table size.
    fn widen_column(&mut self, name: &str, new_width: usize) -> Result<()> {
        let col_path = self.column_path(name);
        let spec = self.column_spec(name)?;
        let nrows = self.file.array_len(&col_path)?;
        log::warn!(
            "Widening column {} in {} from {} to {} bytes, copying {} rows",
            col_path,
            self.file.location(),
            spec.atom.item_size(),
            new_width,
            nrows
        );

        // Sibling arrays are user columns; the copy target must never reuse one.
        let tmp_path = loop {
            let candidate = format!("{}.widen-{}", col_path, uuid::Uuid::new_v4().simple());
            if !self.file.node_exists(&candidate) {
                break candidate;
            }
        };
        let wide = ArraySpec {
            atom: Atom::FixedBytes(new_width),
            ..spec.clone()
        };
        self.file.create_array(&tmp_path, wide)?;

        if let Err(e) = self.copy_rows(&col_path, &tmp_path, nrows, spec.chunk_rows.max(1)) {
            let _ = self.file.remove_node(&tmp_path, false);
            return Err(e);
        }

        self.file.remove_node(&col_path, false)?;
        self.file.rename_node(&tmp_path, &col_path)
    }

    fn copy_rows(&mut self, from: &str, to: &str, nrows: usize, batch: usize) -> Result<()> {
        let mut start = 0;
        while start < nrows {
            let end = (start + batch).min(nrows);
            let positions: Vec<usize> = (start..end).collect();
            let cells = self.file.read_rows(from, Some(&positions))?;
            self.file.append(to, &cells)?;
            start = end;
        }
        Ok(())
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Read columns, optionally restricted to rows or to a query
    ///
    /// Unknown column names in `options.columns` are skipped.
    pub fn read(&self, options: &ReadOptions) -> Result<ColumnMap> {
        let meta = self.meta()?;
        let positions = match (&options.row_indices, &options.query) {
            (Some(rows), _) => {
                let nrows = self.row_count_of(&meta)?;
                if let Some(&bad) = rows.iter().find(|&&r| r >= nrows) {
                    return Err(ColStoreError::IndexOutOfRange { index: bad, len: nrows });
                }
                Some(rows.clone())
            }
            (None, Some(query)) => Some(self.select_with(&meta, query)?),
            (None, None) => None,
        };

        let mut out = ColumnMap::new();
        for (name, dtype) in &meta.column_dtypes {
            if let Some(wanted) = &options.columns {
                if !wanted.contains(name) {
                    continue;
                }
            }
            let spec = self.column_spec(name)?;
            let cells = self.file.read_rows(&self.column_path(name), positions.as_deref())?;
            let representation = options
                .representation
                .or_else(|| meta.column_representations.get(name).copied())
                .unwrap_or(Representation::Sequence);
            out.insert(
                name.clone(),
                decode_column(*dtype, &spec.inner_shape, cells, representation)?,
            );
        }
        Ok(out)
    }

    /// Ascending positions of rows matching `query`
    pub fn select(&self, query: &Query) -> Result<Vec<usize>> {
        let meta = self.meta()?;
        self.select_with(&meta, query)
    }

    fn select_with(&self, meta: &TableMeta, query: &Query) -> Result<Vec<usize>> {
        let nrows = self.row_count_of(meta)?;
        let predicate =
            CompiledPredicate::compile(query, nrows, |name| self.load_buffer(meta, name))?;
        Ok(predicate.evaluate())
    }

    fn load_buffer(&self, meta: &TableMeta, name: &str) -> Result<ColumnBuffer> {
        let dtype = self.column_dtype(meta, name)?;
        let spec = self.column_spec(name)?;
        if let ColumnDtype::Object { .. } = dtype {
            return Err(ValidationError::InvalidQuery(format!(
                "column {} holds structured values and cannot be queried",
                name
            ))
            .into());
        }
        if !spec.inner_shape.is_empty() {
            return Err(ValidationError::InvalidQuery(format!(
                "column {} holds rows of shape {:?} and cannot be queried",
                name, spec.inner_shape
            ))
            .into());
        }
        match (dtype, self.file.read_rows(&self.column_path(name), None)?) {
            (ColumnDtype::Int64, Cells::Int64(v)) => Ok(ColumnBuffer::Int64(v)),
            (ColumnDtype::Float64, Cells::Float64(v)) => Ok(ColumnBuffer::Float64(v)),
            (ColumnDtype::FixedText(_), Cells::Bytes(v)) => Ok(ColumnBuffer::Text(v)),
            (dtype, cells) => Err(ColStoreError::CorruptionRisk(format!(
                "column {} of dtype {} holds {} cells",
                name,
                dtype,
                cells.kind()
            ))),
        }
    }

    /// Iterate the decoded values of one column
    pub fn iter_column(
        &self,
        name: &str,
        representation: Option<Representation>,
    ) -> Result<ColumnIter> {
        let meta = self.meta()?;
        let dtype = self.column_dtype(&meta, name)?;
        let spec = self.column_spec(name)?;
        let cells = self.file.read_rows(&self.column_path(name), None)?;
        let representation = representation
            .or_else(|| meta.column_representations.get(name).copied())
            .unwrap_or(Representation::Sequence);
        Ok(ColumnIter::new(dtype, spec.inner_shape, cells, representation))
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Overwrite the rows matching `query`, returns the number of rows matched
    ///
    /// Each column takes either one value, broadcast to every matched row, or
    /// one value per matched row.
    pub fn update(&mut self, query: &Query, data: &ColumnMap, allow_resize: bool) -> Result<usize> {
        let len = common_length(data)?;
        let mut meta = self.meta()?;
        let rows = self.select_with(&meta, query)?;
        if rows.is_empty() {
            log::debug!("Update of {} matched no rows for {}", self.path, query);
            return Ok(0);
        }
        if len != 1 && len != rows.len() {
            let column = data.keys().next().cloned().unwrap_or_default();
            return Err(ValidationError::LengthMismatch {
                column,
                expected: rows.len(),
                actual: len,
            }
            .into());
        }

        let mut pending: Vec<(&str, EncodedColumn)> = Vec::with_capacity(data.len());
        for (name, column) in data {
            let Some(&dtype) = meta.column_dtypes.get(name) else {
                log::warn!("Column {} is not part of table {}, skipped", name, self.path);
                continue;
            };
            let spec = self.column_spec(name)?;
            let mut encoded = encode_column(name, dtype, &spec.inner_shape, column)?;
            if let Some(width) = dtype.width() {
                if encoded.longest > width && !allow_resize {
                    return Err(self.overflow(name, encoded.longest, width));
                }
            }
            if encoded.rows == 1 && rows.len() > 1 {
                encoded = encoded.broadcast(rows.len());
            }
            pending.push((name.as_str(), encoded));
        }

        for (name, encoded) in pending {
            self.ensure_width(&mut meta, name, encoded.longest, allow_resize)?;
            let col_path = self.column_path(name);
            self.file.write_rows(&col_path, &rows, &encoded.cells)?;
        }
        Ok(rows.len())
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove rows by moving surviving tail rows into the freed slots
    ///
    /// Returns the number of rows removed. Row order is not preserved.
    pub fn delete_rows(&mut self, selection: &RowSelection) -> Result<usize> {
        let meta = self.meta()?;
        let rows = match selection {
            RowSelection::Rows(rows) if rows.is_empty() => {
                return Err(ValidationError::InvalidArgument(
                    "row deletion needs a query or at least one row index".into(),
                )
                .into())
            }
            RowSelection::Rows(rows) => rows.clone(),
            RowSelection::Query(query) => self.select_with(&meta, query)?,
        };
        if rows.is_empty() {
            log::debug!("Delete on {} matched no rows", self.path);
            return Ok(0);
        }

        let nrows = self.row_count_of(&meta)?;
        let plan = plan_removal(nrows, &rows)?;
        let sources = plan.sources();
        let destinations = plan.destinations();
        for name in meta.column_dtypes.keys() {
            let col_path = self.column_path(name);
            if !sources.is_empty() {
                let cells = self.file.read_rows(&col_path, Some(&sources))?;
                self.file.write_rows(&col_path, &destinations, &cells)?;
            }
            self.file.truncate(&col_path, plan.new_len)?;
        }
        log::debug!(
            "Deleted {} rows from {} ({} moved)",
            nrows - plan.new_len,
            self.path,
            sources.len()
        );
        Ok(nrows - plan.new_len)
    }

    // ========================================================================
    // Add / drop column
    // ========================================================================

    /// Add a column holding one value per existing row
    ///
    /// Without `dtype` the type is inferred from `data`; without `shape` the
    /// row shape is taken from `data`.
    pub fn add_column(
        &mut self,
        name: &str,
        data: &ColumnData,
        dtype: Option<ColumnDtype>,
        shape: Option<Vec<usize>>,
        allow_resize: bool,
        expected_rows: usize,
    ) -> Result<()> {
        check_column_name(name)?;
        let mut meta = self.meta()?;
        let col_path = self.column_path(name);
        if meta.column_dtypes.contains_key(name) || self.file.node_exists(&col_path) {
            return Err(ValidationError::InvalidArgument(format!(
                "column {} already exists in table {}",
                name, self.path
            ))
            .into());
        }
        let nrows = self.row_count_of(&meta)?;
        if data.len() != nrows {
            return Err(ValidationError::LengthMismatch {
                column: name.to_string(),
                expected: nrows,
                actual: data.len(),
            }
            .into());
        }

        let dtype = match dtype {
            Some(dtype) => dtype,
            None => infer_dtype(name, data)?,
        };
        let inner = shape.unwrap_or_else(|| inner_shape_of(data));
        check_dtype(name, dtype, &inner)?;
        let encoded = encode_column(name, dtype, &inner, data)?;

        let original = meta.clone();
        let spec = ArraySpec::new(dtype.atom())
            .with_inner_shape(inner)
            .with_chunk_rows(expected_rows);
        self.file.create_array(&col_path, spec)?;
        meta.column_dtypes.insert(name.to_string(), dtype);

        let representation = data.representation();
        let filled = self.fill_new_column(&mut meta, name, encoded, representation, allow_resize);
        if let Err(e) = filled {
            if let Err(cleanup) = self.file.remove_node(&col_path, true) {
                log::error!("Failed to remove column {}: {}", col_path, cleanup);
            }
            if let Err(cleanup) = original.save(&mut *self.file, &self.path) {
                log::error!("Failed to restore metadata of {}: {}", self.path, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    fn fill_new_column(
        &mut self,
        meta: &mut TableMeta,
        name: &str,
        encoded: EncodedColumn,
        representation: Representation,
        allow_resize: bool,
    ) -> Result<()> {
        self.ensure_width(meta, name, encoded.longest, allow_resize)?;
        let col_path = self.column_path(name);
        self.file.append(&col_path, &encoded.cells)?;
        meta.column_representations
            .insert(name.to_string(), representation);
        meta.save(&mut *self.file, &self.path)
    }

    /// Remove a column and its schema entry
    pub fn drop_column(&mut self, name: &str, ignore_if_missing: bool) -> Result<()> {
        let mut meta = self.meta()?;
        if !meta.column_dtypes.contains_key(name) {
            if ignore_if_missing {
                return Ok(());
            }
            return Err(self.column_not_found(name));
        }
        let col_path = self.column_path(name);
        if self.file.node_exists(&col_path) {
            self.file.remove_node(&col_path, false)?;
        }
        meta.column_dtypes.remove(name);
        meta.column_representations.remove(name);
        meta.save(&mut *self.file, &self.path)
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Shared length of every column in `data`
fn common_length(data: &ColumnMap) -> Result<usize> {
    let mut iter = data.iter();
    let (_, first) = iter
        .next()
        .ok_or_else(|| ValidationError::InvalidArgument("no column data given".into()))?;
    let expected = first.len();
    for (name, column) in iter {
        if column.len() != expected {
            return Err(ValidationError::LengthMismatch {
                column: name.clone(),
                expected,
                actual: column.len(),
            }
            .into());
        }
    }
    Ok(expected)
}

fn check_column_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        let message = format!("invalid column name {:?}", name);
        return Err(ValidationError::InvalidArgument(message).into());
    }
    Ok(())
}

fn check_dtype(name: &str, dtype: ColumnDtype, inner: &[usize]) -> Result<()> {
    if dtype.width() == Some(0) {
        return Err(ValidationError::InvalidDtype(format!("column {} has zero width", name)).into());
    }
    if !dtype.is_numeric() && !inner.is_empty() {
        return Err(ValidationError::InvalidArgument(format!(
            "column {} of dtype {} cannot have row shape {:?}",
            name, dtype, inner
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NdArray, TypedArray, Value};
    use crate::query::{CompareOp, Condition};
    use crate::storage::{Compression, ContainerFile, OpenMode};
    use std::path::Path;
    use tempfile::tempdir;

    /// Backend wrapper that fails appends to one array and counts row writes
    struct FaultyFile {
        inner: ContainerFile,
        fail_append_on: Option<String>,
        rows_written: usize,
    }

    impl ArrayBackend for FaultyFile {
        fn location(&self) -> &str {
            self.inner.location()
        }
        fn create_group(&mut self, path: &str) -> Result<()> {
            self.inner.create_group(path)
        }
        fn create_array(&mut self, path: &str, spec: ArraySpec) -> Result<()> {
            self.inner.create_array(path, spec)
        }
        fn array_spec(&self, path: &str) -> Option<ArraySpec> {
            self.inner.array_spec(path)
        }
        fn array_len(&self, path: &str) -> Result<usize> {
            self.inner.array_len(path)
        }
        fn append(&mut self, path: &str, cells: &Cells) -> Result<()> {
            if self.fail_append_on.as_deref() == Some(path) {
                return Err(ColStoreError::Backend(format!("injected failure on {}", path)));
            }
            self.inner.append(path, cells)
        }
        fn read_rows(&self, path: &str, positions: Option<&[usize]>) -> Result<Cells> {
            self.inner.read_rows(path, positions)
        }
        fn write_rows(&mut self, path: &str, positions: &[usize], cells: &Cells) -> Result<()> {
            self.rows_written += positions.len();
            self.inner.write_rows(path, positions, cells)
        }
        fn truncate(&mut self, path: &str, len: usize) -> Result<()> {
            self.inner.truncate(path, len)
        }
        fn node_exists(&self, path: &str) -> bool {
            self.inner.node_exists(path)
        }
        fn list_children(&self, path: &str) -> Result<Vec<String>> {
            self.inner.list_children(path)
        }
        fn get_attr(&self, node: &str, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get_attr(node, key)
        }
        fn set_attr(&mut self, node: &str, key: &str, value: Vec<u8>) -> Result<()> {
            self.inner.set_attr(node, key, value)
        }
        fn remove_node(&mut self, path: &str, recursive: bool) -> Result<()> {
            self.inner.remove_node(path, recursive)
        }
        fn rename_node(&mut self, old_path: &str, new_path: &str) -> Result<()> {
            self.inner.rename_node(old_path, new_path)
        }
        fn copy_file(&self, dest: &Path, compression: Compression) -> Result<()> {
            self.inner.copy_file(dest, compression)
        }
        fn file_size(&self) -> Result<u64> {
            self.inner.file_size()
        }
    }

    fn faulty_file(dir: &Path) -> FaultyFile {
        FaultyFile {
            inner: ContainerFile::open(dir.join("t.h5c"), OpenMode::Append, Compression::None)
                .unwrap(),
            fail_append_on: None,
            rows_written: 0,
        }
    }

    fn sample() -> ColumnMap {
        ColumnMap::from([
            ("col1".to_string(), ColumnData::from((0..10).collect::<Vec<i64>>())),
            (
                "col2".to_string(),
                ColumnData::from(vec!["a", "a", "c", "d", "e", "f", "g", "g", "f", "c"]),
            ),
        ])
    }

    fn sample_dtypes() -> BTreeMap<String, ColumnDtype> {
        BTreeMap::from([
            ("col1".to_string(), ColumnDtype::Int64),
            ("col2".to_string(), ColumnDtype::FixedText(1)),
        ])
    }

    #[test]
    fn test_append_with_dtypes_then_query() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        table.append(&sample(), Some(&sample_dtypes()), true, 100).unwrap();
        assert_eq!(table.row_count().unwrap(), 10);

        let query = Query::new().or_any(vec![
            Condition::new("col1", CompareOp::GreaterThan, 7),
            Condition::new("col1", CompareOp::LessEqual, 3),
        ]);
        assert_eq!(table.select(&query).unwrap(), vec![0, 1, 2, 3, 8, 9]);

        let out = table.read(&ReadOptions::new().query(query)).unwrap();
        assert_eq!(out["col1"].to_i64s().unwrap(), vec![0, 1, 2, 3, 8, 9]);
        assert_eq!(out["col2"].to_strings().unwrap(), vec!["a", "a", "c", "d", "f", "c"]);
    }

    #[test]
    fn test_append_infers_dtypes_and_representations() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/inferred");
        let data = ColumnMap::from([
            ("n".to_string(), ColumnData::from(TypedArray::float64(vec![0.5, 1.5]))),
            ("s".to_string(), ColumnData::from(vec!["x", "yyy"])),
            (
                "o".to_string(),
                ColumnData::Sequence(vec![
                    Value::List(vec![Value::Int(1)]),
                    Value::map([("k", 2i64)]),
                ]),
            ),
        ]);
        table.append(&data, None, false, 10).unwrap();

        let meta = table.meta().unwrap();
        assert_eq!(meta.column_dtypes["n"], ColumnDtype::Float64);
        assert_eq!(meta.column_dtypes["s"], ColumnDtype::FixedText(3));
        assert!(matches!(meta.column_dtypes["o"], ColumnDtype::Object { compressed: false, .. }));
        assert_eq!(meta.column_representations["n"], Representation::NativeArray);
        assert_eq!(meta.column_representations["s"], Representation::Sequence);

        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["n"], ColumnData::from(TypedArray::float64(vec![0.5, 1.5])));
        assert_eq!(out["o"], data["o"]);

        // representation is fixed by the first append
        let more = ColumnMap::from([
            ("n".to_string(), ColumnData::from(vec![2.5])),
            ("s".to_string(), ColumnData::from(vec!["z"])),
            ("o".to_string(), ColumnData::Sequence(vec![Value::Int(3)])),
        ]);
        table.append(&more, None, false, 10).unwrap();
        let meta = table.meta().unwrap();
        assert_eq!(meta.column_representations["n"], Representation::NativeArray);
    }

    #[test]
    fn test_append_rejects_bad_input_without_io() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");

        let mut uneven = sample();
        uneven.insert("col2".to_string(), ColumnData::from(vec!["a"]));
        let err = table.append(&uneven, None, true, 10).unwrap_err();
        assert!(matches!(err, ColStoreError::Validation(ValidationError::LengthMismatch { .. })));
        assert!(!table.exists());

        let bools =
            ColumnMap::from([("b".to_string(), ColumnData::Sequence(vec![Value::Bool(true)]))]);
        assert!(table.append(&bools, None, true, 10).is_err());
        assert!(!table.exists());

        assert!(table.append(&ColumnMap::new(), None, true, 10).is_err());
    }

    #[test]
    fn test_missing_column_and_extra_column() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();

        let partial = ColumnMap::from([("col1".to_string(), ColumnData::from(vec![1i64]))]);
        let err = table.append(&partial, None, true, 10).unwrap_err();
        match err {
            ColStoreError::Validation(ValidationError::MissingColumn { missing, .. }) => {
                assert_eq!(missing, vec!["col2".to_string()])
            }
            other => panic!("unexpected error {other:?}"),
        }

        let mut extra = ColumnMap::from([
            ("col1".to_string(), ColumnData::from(vec![10i64])),
            ("col2".to_string(), ColumnData::from(vec!["z"])),
        ]);
        extra.insert("col9".to_string(), ColumnData::from(vec![1i64]));
        table.append(&extra, None, true, 10).unwrap();
        assert_eq!(table.row_count().unwrap(), 11);
        assert!(!table.meta().unwrap().column_dtypes.contains_key("col9"));
    }

    #[test]
    fn test_failed_append_rolls_back_every_column() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        {
            let mut table = ColumnTable::new(&mut file, "/t");
            table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();
        }
        // col1 is written first (name order), col2 fails
        file.fail_append_on = Some("/t/col2".to_string());
        let mut table = ColumnTable::new(&mut file, "/t");
        let more = ColumnMap::from([
            ("col1".to_string(), ColumnData::from(vec![10i64, 11])),
            ("col2".to_string(), ColumnData::from(vec!["x", "y"])),
        ]);
        assert!(matches!(
            table.append(&more, None, true, 10),
            Err(ColStoreError::Backend(_))
        ));
        assert_eq!(table.row_count().unwrap(), 10);
        drop(table);
        assert_eq!(file.array_len("/t/col1").unwrap(), 10);
        assert_eq!(file.array_len("/t/col2").unwrap(), 10);
    }

    #[test]
    fn test_overflow_without_resize_leaves_table_unchanged() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();

        let more = ColumnMap::from([
            ("col1".to_string(), ColumnData::from(vec![10i64])),
            ("col2".to_string(), ColumnData::from(vec!["long"])),
        ]);
        let err = table.append(&more, None, false, 10).unwrap_err();
        assert!(matches!(err, ColStoreError::Overflow { len: 4, width: 1, .. }));
        assert_eq!(table.row_count().unwrap(), 10);
        assert_eq!(table.meta().unwrap().column_dtypes["col2"], ColumnDtype::FixedText(1));
    }

    #[test]
    fn test_widening_keeps_prior_values() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        let obj = ColumnDtype::Object { width: 100, compressed: false };
        let dtypes = BTreeMap::from([("obj".to_string(), obj)]);
        let small = Value::List(vec![Value::Int(1), Value::Int(0)]);
        table
            .append(
                &ColumnMap::from([("obj".to_string(), ColumnData::Sequence(vec![small.clone()]))]),
                Some(&dtypes),
                true,
                2,
            )
            .unwrap();

        let big = Value::from("x".repeat(110));
        let big_len = crate::codec::encoded_len(&big, false).unwrap();
        assert!(big_len > 100);
        table
            .append(
                &ColumnMap::from([("obj".to_string(), ColumnData::Sequence(vec![big.clone()]))]),
                None,
                true,
                2,
            )
            .unwrap();

        let meta = table.meta().unwrap();
        assert!(meta.column_dtypes["obj"].width().unwrap() >= big_len);
        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["obj"], ColumnData::Sequence(vec![small, big]));
        drop(table);
        assert_eq!(file.list_children("/t").unwrap(), vec!["obj".to_string()]);
    }

    #[test]
    fn test_widening_leaves_similarly_named_columns_alone() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        let dtypes = BTreeMap::from([
            ("a".to_string(), ColumnDtype::FixedText(1)),
            ("a_tmp".to_string(), ColumnDtype::Int64),
        ]);
        let data = ColumnMap::from([
            ("a".to_string(), ColumnData::from(vec!["x", "y"])),
            ("a_tmp".to_string(), ColumnData::from(vec![1i64, 2])),
        ]);
        table.append(&data, Some(&dtypes), true, 10).unwrap();

        let q = Query::from(Condition::new("a_tmp", CompareOp::Equal, 1));
        let long = ColumnMap::from([("a".to_string(), ColumnData::from(vec!["long"]))]);
        assert_eq!(table.update(&q, &long, true).unwrap(), 1);

        let more = ColumnMap::from([
            ("a".to_string(), ColumnData::from(vec!["longer"])),
            ("a_tmp".to_string(), ColumnData::from(vec![3i64])),
        ]);
        table.append(&more, None, true, 10).unwrap();

        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["a"].to_strings().unwrap(), vec!["long", "y", "longer"]);
        assert_eq!(out["a_tmp"].to_i64s().unwrap(), vec![1, 2, 3]);
        let meta = table.meta().unwrap();
        assert_eq!(meta.column_dtypes["a"], ColumnDtype::FixedText(6));
        assert_eq!(meta.column_dtypes["a_tmp"], ColumnDtype::Int64);
        drop(table);
        assert_eq!(file.list_children("/t").unwrap(), vec!["a".to_string(), "a_tmp".to_string()]);
    }

    #[test]
    fn test_widening_compressed_object_column() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        let obj = ColumnDtype::Object { width: 20, compressed: true };
        let dtypes = BTreeMap::from([("obj".to_string(), obj)]);
        let small = Value::Int(7);
        table
            .append(
                &ColumnMap::from([("obj".to_string(), ColumnData::Sequence(vec![small.clone()]))]),
                Some(&dtypes),
                true,
                2,
            )
            .unwrap();

        // Noise does not compress, so the stored cell outgrows the column.
        let mut state = 0x2545_f491_u32;
        let noise: Vec<u8> = (0..300)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect();
        let big = Value::bytes(noise);
        let big_len = crate::codec::encoded_len(&big, true).unwrap();
        assert!(big_len > 20);
        table
            .append(
                &ColumnMap::from([("obj".to_string(), ColumnData::Sequence(vec![big.clone()]))]),
                None,
                true,
                2,
            )
            .unwrap();

        let dtype = table.meta().unwrap().column_dtypes["obj"];
        assert!(matches!(dtype, ColumnDtype::Object { compressed: true, .. }));
        assert!(dtype.to_string().starts_with('c'));
        assert!(dtype.width().unwrap() >= big_len);
        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["obj"], ColumnData::Sequence(vec![small, big]));
    }

    #[test]
    fn test_delete_rows_scenarios() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        {
            let mut table = ColumnTable::new(&mut file, "/t");
            table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();
        }
        file.rows_written = 0;
        let mut table = ColumnTable::new(&mut file, "/t");
        assert_eq!(table.delete_rows(&RowSelection::Rows(vec![2, 5, 6])).unwrap(), 3);
        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["col1"].to_i64s().unwrap(), vec![0, 1, 7, 3, 4, 8, 9]);
        assert_eq!(out["col2"].to_strings().unwrap(), vec!["a", "a", "g", "d", "e", "f", "c"]);

        let q = Query::from(Condition::new("col2", CompareOp::Equal, "a"));
        assert_eq!(table.delete_rows(&RowSelection::Query(q)).unwrap(), 2);
        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["col1"].to_i64s().unwrap(), vec![8, 9, 7, 3, 4]);
        assert_eq!(out["col2"].to_strings().unwrap(), vec!["f", "c", "g", "d", "e"]);

        let q = Query::new().or_any(vec![
            Condition::new("col2", CompareOp::Equal, "d"),
            Condition::new("col2", CompareOp::Equal, "g"),
        ]);
        table.delete_rows(&RowSelection::Query(q)).unwrap();
        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["col1"].to_i64s().unwrap(), vec![8, 9, 4]);
        assert_eq!(out["col2"].to_strings().unwrap(), vec!["f", "c", "e"]);

        // 3 + 2 + 1 row moves, per column
        drop(table);
        assert_eq!(file.rows_written, 2 * (3 + 2 + 1));
    }

    #[test]
    fn test_delete_edge_cases() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();

        let none = Query::from(Condition::new("col1", CompareOp::GreaterThan, 100));
        assert_eq!(table.delete_rows(&RowSelection::Query(none)).unwrap(), 0);
        assert!(table.delete_rows(&RowSelection::Rows(vec![])).is_err());
        assert!(matches!(
            table.delete_rows(&RowSelection::Rows(vec![1, 10])),
            Err(ColStoreError::IndexOutOfRange { index: 10, len: 10 })
        ));
        assert_eq!(table.row_count().unwrap(), 10);

        // tail rows only: nothing moves
        assert_eq!(table.delete_rows(&RowSelection::Rows(vec![9, 8])).unwrap(), 2);
        assert_eq!(table.row_count().unwrap(), 8);
    }

    #[test]
    fn test_update_broadcast_and_per_row() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();

        let q = Query::from(Condition::new("col1", CompareOp::LessThan, 2));
        let n = table
            .update(
                &q,
                &ColumnMap::from([("col1".to_string(), ColumnData::from(vec![20i64]))]),
                true,
            )
            .unwrap();
        assert_eq!(n, 2);
        let out = table.read(&ReadOptions::new().columns(["col1"])).unwrap();
        assert_eq!(out["col1"].to_i64s().unwrap(), vec![20, 20, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(!out.contains_key("col2"));

        let q = Query::from(Condition::new("col1", CompareOp::Equal, 20));
        let data = ColumnMap::from([
            ("col1".to_string(), ColumnData::from(vec![21i64, 22])),
            ("col2".to_string(), ColumnData::from(vec!["w", "zz"])),
        ]);
        table.update(&q, &data, true).unwrap();
        let out = table.read(&ReadOptions::new().rows(vec![0, 1])).unwrap();
        assert_eq!(out["col1"].to_i64s().unwrap(), vec![21, 22]);
        assert_eq!(out["col2"].to_strings().unwrap(), vec!["w", "zz"]);
        assert_eq!(table.meta().unwrap().column_dtypes["col2"], ColumnDtype::FixedText(2));

        let q = Query::from(Condition::new("col1", CompareOp::GreaterThan, 5));
        let bad = ColumnMap::from([("col1".to_string(), ColumnData::from(vec![1i64, 2]))]);
        assert!(matches!(
            table.update(&q, &bad, true),
            Err(ColStoreError::Validation(ValidationError::LengthMismatch {
                expected: 4,
                actual: 2,
                ..
            }))
        ));

        let q = Query::from(Condition::new("col1", CompareOp::GreaterThan, 100));
        assert_eq!(table.update(&q, &bad, true).unwrap(), 0);
    }

    #[test]
    fn test_update_overflow_without_resize_writes_nothing() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        ColumnTable::new(&mut file, "/t")
            .append(&sample(), Some(&sample_dtypes()), true, 10)
            .unwrap();
        file.rows_written = 0;
        let mut table = ColumnTable::new(&mut file, "/t");

        let q = Query::from(Condition::new("col1", CompareOp::Equal, 0));
        let data = ColumnMap::from([
            ("col1".to_string(), ColumnData::from(vec![99i64])),
            ("col2".to_string(), ColumnData::from(vec!["long"])),
        ]);
        let err = table.update(&q, &data, false).unwrap_err();
        assert!(matches!(err, ColStoreError::Overflow { len: 4, width: 1, .. }));

        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["col1"].to_i64s().unwrap(), (0..10).collect::<Vec<i64>>());
        assert_eq!(out["col2"].to_strings().unwrap()[0], "a");
        assert_eq!(table.meta().unwrap().column_dtypes["col2"], ColumnDtype::FixedText(1));
        drop(table);
        assert_eq!(file.rows_written, 0);
    }

    #[test]
    fn test_plain_groups_are_not_tables() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        ColumnTable::new(&mut file, "/grp/t1")
            .append(&sample(), Some(&sample_dtypes()), true, 10)
            .unwrap();

        for path in ["/", "/grp"] {
            let mut table = ColumnTable::new(&mut file, path);
            assert!(!table.exists());
            assert!(matches!(
                table.append(&sample(), None, true, 10),
                Err(ColStoreError::Validation(ValidationError::InvalidArgument(_)))
            ));
            assert!(table.read(&ReadOptions::new()).unwrap_err().is_not_found());
            assert!(table.drop_table().unwrap_err().is_not_found());
        }
        assert!(matches!(
            ColumnTable::new(&mut file, "/").create(&sample_dtypes(), &BTreeMap::new(), 10),
            Err(ColStoreError::Validation(ValidationError::InvalidArgument(_)))
        ));
        assert!(matches!(
            ColumnTable::new(&mut file, "/grp").create(&sample_dtypes(), &BTreeMap::new(), 10),
            Err(ColStoreError::AlreadyExists { kind: NodeKind::Node, .. })
        ));
        assert_eq!(file.list_children("/grp").unwrap(), vec!["t1".to_string()]);
        assert_eq!(ColumnTable::new(&mut file, "/grp/t1").row_count().unwrap(), 10);
    }

    #[test]
    fn test_read_rows_out_of_range_and_missing_table() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        assert!(table.read(&ReadOptions::new()).unwrap_err().is_not_found());
        table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();
        assert!(matches!(
            table.read(&ReadOptions::new().rows(vec![3, 12])),
            Err(ColStoreError::IndexOutOfRange { index: 12, len: 10 })
        ));

        let empty = table
            .read(&ReadOptions::new().query(Condition::new("col1", CompareOp::LessThan, 0)))
            .unwrap();
        assert!(empty["col1"].is_empty());
    }

    #[test]
    fn test_multi_dimensional_column() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/vec");
        let arr =
            TypedArray::float64_shaped(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![3, 2]).unwrap();
        table
            .append(
                &ColumnMap::from([("v".to_string(), ColumnData::from(arr.clone()))]),
                None,
                true,
                10,
            )
            .unwrap();
        assert_eq!(table.file.array_spec("/vec/v").unwrap().inner_shape, vec![2]);

        let out = table.read(&ReadOptions::new()).unwrap();
        assert_eq!(out["v"], ColumnData::from(arr));

        let rows: Vec<Value> = table.iter_column("v", None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows[2], Value::Array(NdArray::from_f64(vec![2], &[5.0, 6.0])));

        let q = Query::from(Condition::new("v", CompareOp::Equal, 1.0));
        assert!(matches!(
            table.select(&q),
            Err(ColStoreError::Validation(ValidationError::InvalidQuery(_)))
        ));
    }

    #[test]
    fn test_add_and_drop_column() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();

        let short = ColumnData::from(vec![1i64]);
        assert!(matches!(
            table.add_column("col3", &short, None, None, true, 10),
            Err(ColStoreError::Validation(ValidationError::LengthMismatch { expected: 10, .. }))
        ));

        let names: Vec<String> = (0..10).map(|i| format!("name-{}", i)).collect();
        table
            .add_column(
                "col3",
                &ColumnData::from(names.clone()),
                Some(ColumnDtype::FixedText(2)),
                None,
                true,
                10,
            )
            .unwrap();
        let meta = table.meta().unwrap();
        assert_eq!(meta.column_dtypes["col3"], ColumnDtype::FixedText(6));
        assert_eq!(meta.column_representations["col3"], Representation::Sequence);
        let values: Vec<Value> =
            table.iter_column("col3", None).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(values[9], Value::from("name-9"));

        assert!(table
            .add_column("col3", &ColumnData::from(names), None, None, true, 10)
            .is_err());

        table.drop_column("col3", false).unwrap();
        assert!(table.drop_column("col3", false).unwrap_err().is_not_found());
        table.drop_column("col3", true).unwrap();
        assert!(!table.meta().unwrap().column_dtypes.contains_key("col3"));
        assert_eq!(table.row_count().unwrap(), 10);
    }

    #[test]
    fn test_add_column_overflow_cleans_up() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "/t");
        table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();

        let words = ColumnData::from(vec!["toolong"; 10]);
        let err = table
            .add_column("w", &words, Some(ColumnDtype::FixedText(3)), None, false, 10)
            .unwrap_err();
        assert!(matches!(err, ColStoreError::Overflow { .. }));
        assert!(!table.meta().unwrap().column_dtypes.contains_key("w"));
        assert!(!table.file.node_exists("/t/w"));
    }

    #[test]
    fn test_row_count_detects_unequal_columns() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        {
            let mut table = ColumnTable::new(&mut file, "/t");
            table.append(&sample(), Some(&sample_dtypes()), true, 10).unwrap();
        }
        file.truncate("/t/col2", 4).unwrap();
        let table = ColumnTable::new(&mut file, "/t");
        assert!(matches!(table.row_count(), Err(ColStoreError::CorruptionRisk(_))));
    }

    #[test]
    fn test_create_and_drop_table() {
        let dir = tempdir().unwrap();
        let mut file = faulty_file(dir.path());
        let mut table = ColumnTable::new(&mut file, "a/b/");
        assert_eq!(table.path(), "/a/b");
        table.create(&sample_dtypes(), &BTreeMap::new(), 10).unwrap();
        assert!(matches!(
            table.create(&sample_dtypes(), &BTreeMap::new(), 10),
            Err(ColStoreError::AlreadyExists { .. })
        ));
        assert_eq!(table.row_count().unwrap(), 0);
        table.drop_table().unwrap();
        assert!(!table.exists());
        assert!(table.drop_table().unwrap_err().is_not_found());

        let bad_shape = BTreeMap::from([("col2".to_string(), vec![2])]);
        assert!(table.create(&sample_dtypes(), &bad_shape, 10).is_err());
        assert!(!table.exists());
    }
}
