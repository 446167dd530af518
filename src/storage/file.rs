//! Single-file array container
//!
//! File layout:
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (64 bytes)                           │
//! ├─────────────────────────────────────────────┤
//! │ Body: bincode(node tree), compressed        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The whole node tree is loaded on open and written back by [`ContainerFile::flush`]
//! through a temporary sibling file and a rename, so a crash mid-write
//! leaves the previous version intact. Dropping a handle without flushing
//! discards its changes.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::backend::{ArrayBackend, ArraySpec, Atom, Cells};
use super::header::{Compression, ContainerHeader, HEADER_SIZE};
use super::{base_name, norm_path, parent_path};
use crate::{ColStoreError, NodeKind, Result};

/// How a container is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// File must exist; mutations are rejected and nothing is written back
    Read,
    /// File is created when missing
    Append,
    /// File must exist and may be modified
    ReadWrite,
}

impl OpenMode {
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

// ============================================================================
// Node tree
// ============================================================================

type Attrs = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum ArrayStore {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    /// `len * width` bytes, each cell zero padded
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Group {
        attrs: Attrs,
    },
    Array {
        spec: ArraySpec,
        len: usize,
        store: ArrayStore,
        attrs: Attrs,
    },
}

impl Node {
    fn attrs(&self) -> &Attrs {
        match self {
            Node::Group { attrs } | Node::Array { attrs, .. } => attrs,
        }
    }

    fn attrs_mut(&mut self) -> &mut Attrs {
        match self {
            Node::Group { attrs } | Node::Array { attrs, .. } => attrs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeTree {
    nodes: BTreeMap<String, Node>,
}

impl Default for NodeTree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Group { attrs: Attrs::new() });
        Self { nodes }
    }
}

impl NodeTree {
    /// Keys of `path` and everything below it
    fn subtree_keys(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);
        self.nodes
            .keys()
            .filter(|k| k.as_str() == path || k.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

// ============================================================================
// ContainerFile
// ============================================================================

/// Array container persisted as one checksummed, compressed file
///
/// The node tree lives in memory while the handle is open. A dirty handle
/// re-encodes and rewrites the whole file on [`flush`](Self::flush), so every
/// write-back costs time proportional to the file size under `compression`.
pub struct ContainerFile {
    path: PathBuf,
    location: String,
    mode: OpenMode,
    header: ContainerHeader,
    compression: Compression,
    tree: NodeTree,
    dirty: bool,
}

impl ContainerFile {
    /// Open a container, loading its node tree into memory
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, compression: Compression) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let location = path.display().to_string();

        if path.exists() {
            let (header, tree) = read_container(&path)?;
            log::debug!("Opened container {} ({} nodes)", location, tree.nodes.len());
            Ok(Self {
                path,
                location,
                mode,
                header,
                compression,
                tree,
                dirty: false,
            })
        } else if mode == OpenMode::Append {
            Ok(Self {
                path,
                location,
                mode,
                header: ContainerHeader::new(compression),
                compression,
                tree: NodeTree::default(),
                dirty: true,
            })
        } else {
            Err(ColStoreError::not_found(NodeKind::File, location.clone(), location))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Write pending changes back to disk
    pub fn flush(&mut self) -> Result<()> {
        if !self.mode.is_writable() || !self.dirty {
            return Ok(());
        }
        self.header.touch();
        self.header = write_container(&self.path, &self.tree, &self.header, self.compression)?;
        self.dirty = false;
        Ok(())
    }

    /// Flush and release the handle
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(ColStoreError::Backend(format!(
                "{} is opened read-only",
                self.location
            )))
        }
    }

    fn node(&self, path: &str) -> Result<&Node> {
        let path = norm_path(path);
        self.tree
            .nodes
            .get(&path)
            .ok_or_else(|| ColStoreError::not_found(NodeKind::Node, path, self.location.clone()))
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node> {
        let path = norm_path(path);
        let location = self.location.clone();
        self.tree
            .nodes
            .get_mut(&path)
            .ok_or_else(|| ColStoreError::not_found(NodeKind::Node, path, location))
    }

    fn not_an_array(&self, path: &str) -> ColStoreError {
        ColStoreError::Backend(format!("{} in {} is not an array", path, self.location))
    }
}

/// Read and verify a container file
fn read_container(path: &Path) -> Result<(ContainerHeader, NodeTree)> {
    let bytes = fs::read(path)?;
    let header = ContainerHeader::from_bytes(&bytes)?;
    let body_end = HEADER_SIZE + header.body_len as usize;
    let stored = bytes.get(HEADER_SIZE..body_end).ok_or_else(|| {
        ColStoreError::Backend(format!("{}: container body truncated", path.display()))
    })?;
    if crc32fast::hash(stored) != header.body_crc {
        return Err(ColStoreError::Backend(format!(
            "{}: container body checksum mismatch",
            path.display()
        )));
    }
    let raw = header.compression.decompress(stored, header.raw_len as usize)?;
    let tree: NodeTree = bincode::deserialize(&raw)
        .map_err(|e| ColStoreError::Backend(format!("{}: {}", path.display(), e)))?;
    Ok((header, tree))
}

/// Serialize a node tree into `dest` via a temporary sibling and a rename
fn write_container(
    dest: &Path,
    tree: &NodeTree,
    header: &ContainerHeader,
    compression: Compression,
) -> Result<ContainerHeader> {
    let raw = bincode::serialize(tree).map_err(|e| ColStoreError::Backend(e.to_string()))?;
    let stored = compression.compress(&raw)?;

    let mut header = header.clone();
    header.compression = compression;
    header.body_len = stored.len() as u64;
    header.raw_len = raw.len() as u64;
    header.body_crc = crc32fast::hash(&stored);

    let tmp = temp_sibling(dest);
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&stored)?;
        file.sync_all()?;
        fs::rename(&tmp, dest)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(header)
}

/// Unique temporary path next to `path`
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

fn strip_trailing_zeros(cell: &[u8]) -> Vec<u8> {
    let end = cell.iter().rposition(|&b| b != 0).map(|p| p + 1).unwrap_or(0);
    cell[..end].to_vec()
}

// ============================================================================
// ArrayBackend implementation
// ============================================================================

impl ArrayBackend for ContainerFile {
    fn location(&self) -> &str {
        &self.location
    }

    fn create_group(&mut self, path: &str) -> Result<()> {
        self.check_writable()?;
        let path = norm_path(path);
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = format!("{}/{}", current, part);
            match self.tree.nodes.get(&current) {
                Some(Node::Group { .. }) => {}
                Some(Node::Array { .. }) => {
                    return Err(ColStoreError::Backend(format!(
                        "cannot create group below array {} in {}",
                        current, self.location
                    )))
                }
                None => {
                    self.tree
                        .nodes
                        .insert(current.clone(), Node::Group { attrs: Attrs::new() });
                    self.dirty = true;
                }
            }
        }
        Ok(())
    }

    fn create_array(&mut self, path: &str, spec: ArraySpec) -> Result<()> {
        self.check_writable()?;
        let path = norm_path(path);
        if path == "/" {
            return Err(ColStoreError::Backend("cannot create an array at the root".into()));
        }
        if self.tree.nodes.contains_key(&path) {
            return Err(ColStoreError::AlreadyExists {
                kind: NodeKind::Node,
                name: path,
                file: self.location.clone(),
            });
        }
        let store = match spec.atom {
            Atom::Int64 => ArrayStore::Int64(Vec::new()),
            Atom::Float64 => ArrayStore::Float64(Vec::new()),
            Atom::FixedBytes(0) => {
                return Err(ColStoreError::Backend(format!("{}: byte width must be positive", path)))
            }
            Atom::FixedBytes(_) if !spec.inner_shape.is_empty() => {
                return Err(ColStoreError::Backend(format!(
                    "{}: byte arrays cannot have a row shape",
                    path
                )))
            }
            Atom::FixedBytes(_) => ArrayStore::Bytes(Vec::new()),
        };
        self.create_group(&parent_path(&path))?;
        self.tree.nodes.insert(
            path,
            Node::Array {
                spec,
                len: 0,
                store,
                attrs: Attrs::new(),
            },
        );
        self.dirty = true;
        Ok(())
    }

    fn array_spec(&self, path: &str) -> Option<ArraySpec> {
        match self.tree.nodes.get(&norm_path(path)) {
            Some(Node::Array { spec, .. }) => Some(spec.clone()),
            _ => None,
        }
    }

    fn array_len(&self, path: &str) -> Result<usize> {
        match self.node(path)? {
            Node::Array { len, .. } => Ok(*len),
            Node::Group { .. } => Err(self.not_an_array(path)),
        }
    }

    fn append(&mut self, path: &str, cells: &Cells) -> Result<()> {
        self.check_writable()?;
        let location = self.location.clone();
        let not_array = self.not_an_array(path);
        let Node::Array { spec, len, store, .. } = self.node_mut(path)? else {
            return Err(not_array);
        };
        let width = spec.row_width();
        let rows = cells.rows(width);
        if !matches!(cells, Cells::Bytes(_)) && rows * width != cells.len() {
            return Err(ColStoreError::Backend(format!(
                "{}: {} elements do not form whole rows of width {}",
                path,
                cells.len(),
                width
            )));
        }

        match (store, cells, spec.atom) {
            (ArrayStore::Int64(data), Cells::Int64(values), _) => data.extend_from_slice(values),
            (ArrayStore::Float64(data), Cells::Float64(values), _) => {
                data.extend_from_slice(values)
            }
            (ArrayStore::Bytes(data), Cells::Bytes(values), Atom::FixedBytes(item)) => {
                if let Some(cell) = values.iter().find(|c| c.len() > item) {
                    return Err(ColStoreError::Overflow {
                        column: norm_path(path),
                        len: cell.len(),
                        width: item,
                        file: location,
                    });
                }
                data.reserve(values.len() * item);
                for cell in values {
                    data.extend_from_slice(cell);
                    data.resize(data.len() + item - cell.len(), 0);
                }
            }
            _ => {
                return Err(ColStoreError::Backend(format!(
                    "{}: cannot append {} cells to {:?} array",
                    path,
                    cells.kind(),
                    spec.atom
                )))
            }
        }
        *len += rows;
        self.dirty = true;
        Ok(())
    }

    fn read_rows(&self, path: &str, positions: Option<&[usize]>) -> Result<Cells> {
        let Node::Array { spec, len, store, .. } = self.node(path)? else {
            return Err(self.not_an_array(path));
        };
        if let Some(positions) = positions {
            if let Some(&bad) = positions.iter().find(|&&p| p >= *len) {
                return Err(ColStoreError::IndexOutOfRange { index: bad, len: *len });
            }
        }
        let width = spec.row_width();

        let cells = match store {
            ArrayStore::Int64(data) => Cells::Int64(gather(data, width, positions)),
            ArrayStore::Float64(data) => Cells::Float64(gather(data, width, positions)),
            ArrayStore::Bytes(data) => {
                let item = spec.atom.item_size();
                let cell = |row: usize| strip_trailing_zeros(&data[row * item..(row + 1) * item]);
                match positions {
                    None => Cells::Bytes((0..*len).map(cell).collect()),
                    Some(p) => Cells::Bytes(p.iter().map(|&row| cell(row)).collect()),
                }
            }
        };
        Ok(cells)
    }

    fn write_rows(&mut self, path: &str, positions: &[usize], cells: &Cells) -> Result<()> {
        self.check_writable()?;
        let location = self.location.clone();
        let not_array = self.not_an_array(path);
        let Node::Array { spec, len, store, .. } = self.node_mut(path)? else {
            return Err(not_array);
        };
        let width = spec.row_width();
        let flat_mismatch =
            !matches!(cells, Cells::Bytes(_)) && cells.len() != positions.len() * width;
        if cells.rows(width) != positions.len() || flat_mismatch {
            return Err(ColStoreError::Backend(format!(
                "{}: {} positions but {} {} cells",
                path,
                positions.len(),
                cells.len(),
                cells.kind()
            )));
        }
        if let Some(&bad) = positions.iter().find(|&&p| p >= *len) {
            return Err(ColStoreError::IndexOutOfRange { index: bad, len: *len });
        }

        match (store, cells, spec.atom) {
            (ArrayStore::Int64(data), Cells::Int64(values), _) => {
                scatter(data, width, positions, values)
            }
            (ArrayStore::Float64(data), Cells::Float64(values), _) => {
                scatter(data, width, positions, values)
            }
            (ArrayStore::Bytes(data), Cells::Bytes(values), Atom::FixedBytes(item)) => {
                if let Some(cell) = values.iter().find(|c| c.len() > item) {
                    return Err(ColStoreError::Overflow {
                        column: norm_path(path),
                        len: cell.len(),
                        width: item,
                        file: location,
                    });
                }
                for (&row, cell) in positions.iter().zip(values) {
                    let slot = &mut data[row * item..(row + 1) * item];
                    slot.fill(0);
                    slot[..cell.len()].copy_from_slice(cell);
                }
            }
            _ => {
                return Err(ColStoreError::Backend(format!(
                    "{}: cannot write {} cells to {:?} array",
                    path,
                    cells.kind(),
                    spec.atom
                )))
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn truncate(&mut self, path: &str, new_len: usize) -> Result<()> {
        self.check_writable()?;
        let not_array = self.not_an_array(path);
        let Node::Array { spec, len, store, .. } = self.node_mut(path)? else {
            return Err(not_array);
        };
        if new_len > *len {
            return Err(ColStoreError::Backend(format!(
                "{}: cannot truncate {} rows to {}",
                path, len, new_len
            )));
        }
        let elements = new_len * spec.row_width();
        match store {
            ArrayStore::Int64(data) => data.truncate(elements),
            ArrayStore::Float64(data) => data.truncate(elements),
            ArrayStore::Bytes(data) => data.truncate(new_len * spec.atom.item_size()),
        }
        *len = new_len;
        self.dirty = true;
        Ok(())
    }

    fn node_exists(&self, path: &str) -> bool {
        self.tree.nodes.contains_key(&norm_path(path))
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let path = norm_path(path);
        match self.node(&path)? {
            Node::Group { .. } => {}
            Node::Array { .. } => return Err(self.not_an_array(&path)),
        }
        Ok(self
            .tree
            .nodes
            .keys()
            .filter(|k| k.as_str() != "/" && parent_path(k) == path)
            .map(|k| base_name(k).to_string())
            .collect())
    }

    fn get_attr(&self, node: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.node(node)?.attrs().get(key).cloned())
    }

    fn set_attr(&mut self, node: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.check_writable()?;
        self.node_mut(node)?.attrs_mut().insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn remove_node(&mut self, path: &str, recursive: bool) -> Result<()> {
        self.check_writable()?;
        let path = norm_path(path);
        if path == "/" {
            return Err(ColStoreError::Backend("cannot remove the root group".into()));
        }
        self.node(&path)?;
        let keys = self.tree.subtree_keys(&path);
        if keys.len() > 1 && !recursive {
            return Err(ColStoreError::Backend(format!(
                "{} in {} has children, use a recursive removal",
                path, self.location
            )));
        }
        for key in keys {
            self.tree.nodes.remove(&key);
        }
        self.dirty = true;
        Ok(())
    }

    fn rename_node(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        self.check_writable()?;
        let old_path = norm_path(old_path);
        let new_path = norm_path(new_path);
        self.node(&old_path)?;
        if self.tree.nodes.contains_key(&new_path) {
            return Err(ColStoreError::AlreadyExists {
                kind: NodeKind::Node,
                name: new_path,
                file: self.location.clone(),
            });
        }
        if new_path.starts_with(&format!("{}/", old_path)) {
            return Err(ColStoreError::Backend(format!(
                "cannot move {} below itself",
                old_path
            )));
        }
        self.create_group(&parent_path(&new_path))?;
        for key in self.tree.subtree_keys(&old_path) {
            if let Some(node) = self.tree.nodes.remove(&key) {
                let moved = format!("{}{}", new_path, &key[old_path.len()..]);
                self.tree.nodes.insert(moved, node);
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn copy_file(&self, dest: &Path, compression: Compression) -> Result<()> {
        let header = ContainerHeader {
            compression,
            ..self.header.clone()
        };
        write_container(dest, &self.tree, &header, compression)?;
        Ok(())
    }

    fn file_size(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn gather<T: Copy>(data: &[T], width: usize, positions: Option<&[usize]>) -> Vec<T> {
    match positions {
        None => data.to_vec(),
        Some(p) => {
            let mut out = Vec::with_capacity(p.len() * width);
            for &row in p {
                out.extend_from_slice(&data[row * width..(row + 1) * width]);
            }
            out
        }
    }
}

fn scatter<T: Copy>(data: &mut [T], width: usize, positions: &[usize], values: &[T]) {
    for (i, &row) in positions.iter().enumerate() {
        data[row * width..(row + 1) * width].copy_from_slice(&values[i * width..(i + 1) * width]);
    }
}
