//! Store facade
//!
//! [`ColStore`] is a path plus options. Every call opens the container,
//! runs one table engine operation, and closes the file again. Changes reach
//! disk only when the operation succeeds; on error the handle is dropped and
//! the file keeps its previous contents.

mod config;

pub use config::{StoreOptions, CONTAINER_EXTENSION};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::data::{ColumnData, Representation};
use crate::query::Query;
use crate::storage::file::temp_sibling;
use crate::storage::{
    join_path, ArrayBackend, ArraySpec, Atom, Cells, Compression, ContainerFile, OpenMode,
};
use crate::table::{
    ColumnDtype, ColumnIter, ColumnMap, ColumnTable, ReadOptions, RowSelection, TableInfo,
    META_ATTR,
};
use crate::{ColStoreError, NodeKind, Result, ValidationError};

/// Root array holding `[timestamp, file_size]` of the last repack
pub const REPACK_MARKER: &str = "/_last_repack";

/// Handle to a table store file
#[derive(Debug, Clone)]
pub struct ColStore {
    path: PathBuf,
    options: StoreOptions,
}

impl ColStore {
    /// Store at `path` with default options. Nothing is touched on disk.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, StoreOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext == CONTAINER_EXTENSION => Ok(Self { path, options }),
            _ => Err(ValidationError::InvalidArgument(format!(
                "store path {} must have the .{} extension",
                path.display(),
                CONTAINER_EXTENSION
            ))
            .into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    // ========================================================================
    // Scoped file access
    // ========================================================================

    fn read_file<T>(&self, f: impl FnOnce(&mut ContainerFile) -> Result<T>) -> Result<T> {
        let compression = self.options.write_compression;
        let mut file = ContainerFile::open(&self.path, OpenMode::Read, compression)?;
        f(&mut file)
    }

    /// Run `f` on a writable handle and write the result back on success
    ///
    /// `OpenMode::Append` creates a missing file, `OpenMode::ReadWrite`
    /// requires it to exist.
    fn write_file<T>(
        &self,
        mode: OpenMode,
        f: impl FnOnce(&mut ContainerFile) -> Result<T>,
    ) -> Result<T> {
        self.write_file_with(mode, self.options.write_compression, f)
    }

    fn write_file_with<T>(
        &self,
        mode: OpenMode,
        compression: Compression,
        f: impl FnOnce(&mut ContainerFile) -> Result<T>,
    ) -> Result<T> {
        if mode == OpenMode::Append && self.options.create_dirs {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }
        let mut file = ContainerFile::open(&self.path, mode, compression)?;
        let out = f(&mut file)?;
        file.close()?;
        Ok(out)
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Create an empty table
    ///
    /// `shapes` gives the row shape of multi-dimensional numeric columns.
    pub fn create_table(
        &self,
        table: &str,
        dtypes: &BTreeMap<String, ColumnDtype>,
        shapes: &BTreeMap<String, Vec<usize>>,
        expected_rows: Option<usize>,
    ) -> Result<()> {
        let expected_rows = expected_rows.unwrap_or(self.options.expected_rows);
        self.write_file(OpenMode::Append, |file| {
            ColumnTable::new(file, table).create(dtypes, shapes, expected_rows)
        })
    }

    pub fn delete_table(&self, table: &str, ignore_if_missing: bool) -> Result<()> {
        let result = self.write_file(OpenMode::ReadWrite, |file| {
            ColumnTable::new(file, table).drop_table()
        });
        match result {
            Err(e) if ignore_if_missing && e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Summary of a table, `None` when the file or table is absent
    pub fn table_info(&self, table: &str) -> Result<Option<TableInfo>> {
        if !self.path.exists() {
            return Ok(None);
        }
        self.read_file(|file| {
            let table = ColumnTable::new(file, table);
            if !table.exists() {
                return Ok(None);
            }
            table.info().map(Some)
        })
    }

    /// Row count, 0 when the file or table is absent
    pub fn table_nrows(&self, table: &str) -> Result<usize> {
        Ok(self.table_info(table)?.map_or(0, |info| info.nrows))
    }

    /// Paths of every table in the store
    pub fn tables(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        self.read_file(|file| {
            let mut out = Vec::new();
            collect_tables(file, "/", &mut out)?;
            out.sort();
            Ok(out)
        })
    }

    /// Pretty printed JSON rendering of the node tree
    pub fn describe(&self) -> Result<String> {
        self.read_file(|file| {
            let tree = describe_node(file, "/")?;
            serde_json::to_string_pretty(&tree).map_err(|e| ColStoreError::Backend(e.to_string()))
        })
    }

    // ========================================================================
    // Rows
    // ========================================================================

    /// Append rows using the store's resize policy, creating the table when absent
    pub fn append(&self, table: &str, data: &ColumnMap) -> Result<()> {
        self.append_with(table, data, None, self.options.allow_resize)
    }

    pub fn append_with(
        &self,
        table: &str,
        data: &ColumnMap,
        dtypes: Option<&BTreeMap<String, ColumnDtype>>,
        allow_resize: bool,
    ) -> Result<()> {
        let expected_rows = self.options.expected_rows;
        self.write_file(OpenMode::Append, |file| {
            ColumnTable::new(file, table).append(data, dtypes, allow_resize, expected_rows)
        })
    }

    pub fn read(&self, table: &str, options: &ReadOptions) -> Result<ColumnMap> {
        self.read_file(|file| ColumnTable::new(file, table).read(options))
    }

    /// Positions of rows matching `query`
    pub fn select(&self, table: &str, query: &Query) -> Result<Vec<usize>> {
        self.read_file(|file| ColumnTable::new(file, table).select(query))
    }

    pub fn iter_column(
        &self,
        table: &str,
        column: &str,
        representation: Option<Representation>,
    ) -> Result<ColumnIter> {
        self.read_file(|file| ColumnTable::new(file, table).iter_column(column, representation))
    }

    /// Overwrite matching rows, returns the number of rows matched
    pub fn update(&self, table: &str, query: &Query, data: &ColumnMap) -> Result<usize> {
        self.update_with(table, query, data, self.options.allow_resize)
    }

    pub fn update_with(
        &self,
        table: &str,
        query: &Query,
        data: &ColumnMap,
        allow_resize: bool,
    ) -> Result<usize> {
        self.write_file(OpenMode::ReadWrite, |file| {
            ColumnTable::new(file, table).update(query, data, allow_resize)
        })
    }

    /// Remove rows, returns the number of rows removed
    pub fn delete_rows(&self, table: &str, selection: impl Into<RowSelection>) -> Result<usize> {
        let selection = selection.into();
        self.write_file(OpenMode::ReadWrite, |file| {
            ColumnTable::new(file, table).delete_rows(&selection)
        })
    }

    // ========================================================================
    // Columns
    // ========================================================================

    pub fn add_column(
        &self,
        table: &str,
        name: &str,
        data: &ColumnData,
        dtype: Option<ColumnDtype>,
        shape: Option<Vec<usize>>,
    ) -> Result<()> {
        let allow_resize = self.options.allow_resize;
        let expected_rows = self.options.expected_rows;
        self.write_file(OpenMode::ReadWrite, |file| {
            ColumnTable::new(file, table)
                .add_column(name, data, dtype, shape, allow_resize, expected_rows)
        })
    }

    pub fn delete_column(&self, table: &str, name: &str, ignore_if_missing: bool) -> Result<()> {
        let result = self.write_file(OpenMode::ReadWrite, |file| {
            ColumnTable::new(file, table).drop_column(name, ignore_if_missing)
        });
        match result {
            Err(e) if ignore_if_missing && e.is_not_found() => Ok(()),
            other => other,
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rewrite the whole file under the store's repack compression
    ///
    /// Records `[timestamp, file_size]` in [`REPACK_MARKER`]. The marker write
    /// keeps the repack compression; later modifying calls write back with
    /// `write_compression` again.
    pub fn repack(&self) -> Result<()> {
        if !self.path.exists() {
            let location = self.path.display().to_string();
            return Err(ColStoreError::not_found(NodeKind::File, location.clone(), location));
        }
        let before = fs::metadata(&self.path)?.len();

        let tmp = temp_sibling(&self.path);
        let copied = self.read_file(|file| file.copy_file(&tmp, self.options.compression));
        let replaced =
            copied.and_then(|_| fs::rename(&tmp, &self.path).map_err(ColStoreError::from));
        if let Err(e) = replaced {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        let size = fs::metadata(&self.path)?.len();
        let timestamp = chrono::Utc::now().timestamp();
        self.write_file_with(OpenMode::ReadWrite, self.options.compression, |file| {
            let marker = Cells::Float64(vec![timestamp as f64, size as f64]);
            if file.array_spec(REPACK_MARKER).is_none() {
                let spec = ArraySpec::new(Atom::Float64)
                    .with_inner_shape(vec![2])
                    .with_chunk_rows(1);
                file.create_array(REPACK_MARKER, spec)?;
            }
            if file.array_len(REPACK_MARKER)? == 0 {
                file.append(REPACK_MARKER, &marker)
            } else {
                file.write_rows(REPACK_MARKER, &[0], &marker)
            }
        })?;
        log::info!(
            "Repacked {} with {:?}: {} -> {} bytes",
            self.path.display(),
            self.options.compression,
            before,
            size
        );
        Ok(())
    }

    /// `(timestamp, file_size)` recorded by the last repack
    pub fn last_repack(&self) -> Result<Option<(i64, u64)>> {
        if !self.path.exists() {
            return Ok(None);
        }
        self.read_file(|file| {
            if file.array_spec(REPACK_MARKER).is_none() {
                return Ok(None);
            }
            match file.read_rows(REPACK_MARKER, None)? {
                Cells::Float64(v) if v.len() >= 2 => Ok(Some((v[0] as i64, v[1] as u64))),
                _ => Ok(None),
            }
        })
    }
}

// ============================================================================
// Tree walking
// ============================================================================

fn is_table<B: ArrayBackend + ?Sized>(file: &B, path: &str) -> Result<bool> {
    Ok(file.array_spec(path).is_none() && file.get_attr(path, META_ATTR)?.is_some())
}

fn collect_tables<B: ArrayBackend + ?Sized>(
    file: &B,
    path: &str,
    out: &mut Vec<String>,
) -> Result<()> {
    for child in file.list_children(path)? {
        let child_path = join_path(path, &child);
        if file.array_spec(&child_path).is_some() {
            continue;
        }
        if is_table(file, &child_path)? {
            out.push(child_path);
        } else {
            collect_tables(file, &child_path, out)?;
        }
    }
    Ok(())
}

fn describe_node(file: &mut ContainerFile, path: &str) -> Result<serde_json::Value> {
    if let Some(spec) = file.array_spec(path) {
        return Ok(json!({
            "kind": "array",
            "atom": format!("{:?}", spec.atom),
            "inner_shape": spec.inner_shape,
            "len": file.array_len(path)?,
        }));
    }
    if path != "/" && is_table(&*file, path)? {
        let info = ColumnTable::new(&mut *file, path).info()?;
        return Ok(json!({ "kind": "table", "table": info.to_json() }));
    }
    let mut children = serde_json::Map::new();
    for child in file.list_children(path)? {
        let child_path = join_path(path, &child);
        children.insert(child, describe_node(file, &child_path)?);
    }
    Ok(json!({ "kind": "group", "children": children }))
}
