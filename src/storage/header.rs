//! Container file header

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

/// Magic bytes "COLSTOR\0"
pub const MAGIC: &[u8; 8] = b"COLSTOR\0";
/// Current container format version
pub const FORMAT_VERSION: u32 = 1;
/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

const COMPRESS_NONE: u8 = 0;
const COMPRESS_LZ4: u8 = 1;
const COMPRESS_ZSTD: u8 = 2;

/// Default zstd level for container bodies
pub const DEFAULT_ZSTD_LEVEL: i32 = 9;

/// Body compression policy of a container file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lz4,
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd {
            level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl Compression {
    fn flag(&self) -> u8 {
        match self {
            Compression::None => COMPRESS_NONE,
            Compression::Lz4 => COMPRESS_LZ4,
            Compression::Zstd { .. } => COMPRESS_ZSTD,
        }
    }

    fn level(&self) -> i32 {
        match self {
            Compression::Zstd { level } => *level,
            _ => 0,
        }
    }

    fn from_parts(flag: u8, level: i32) -> io::Result<Self> {
        match flag {
            COMPRESS_NONE => Ok(Compression::None),
            COMPRESS_LZ4 => Ok(Compression::Lz4),
            COMPRESS_ZSTD => Ok(Compression::Zstd { level }),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown compression flag: {}", other),
            )),
        }
    }

    /// Compress a body
    pub fn compress(&self, body: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Compression::None => Ok(body.to_vec()),
            Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(body)),
            Compression::Zstd { level } => zstd::bulk::compress(body, *level),
        }
    }

    /// Decompress a body of known uncompressed size
    pub fn decompress(&self, stored: &[u8], raw_len: usize) -> io::Result<Vec<u8>> {
        match self {
            Compression::None => Ok(stored.to_vec()),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(stored).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("LZ4 decompress failed: {}", e))
            }),
            Compression::Zstd { .. } => zstd::bulk::decompress(stored, raw_len),
        }
    }
}

/// Container header (64 bytes)
///
/// ```text
/// magic[8] version:u32 compression:u8 pad[3] zstd_level:i32
/// body_len:u64 raw_len:u64 body_crc:u32 created_at:i64 modified_at:i64
/// header_crc:u32
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHeader {
    pub version: u32,
    pub compression: Compression,
    /// Stored (compressed) body length
    pub body_len: u64,
    /// Uncompressed body length
    pub raw_len: u64,
    /// crc32 of the stored body
    pub body_crc: u32,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
    /// Last write timestamp (Unix seconds)
    pub modified_at: i64,
}

impl ContainerHeader {
    pub fn new(compression: Compression) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            version: FORMAT_VERSION,
            compression,
            body_len: 0,
            raw_len: 0,
            body_crc: 0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Update modification time
    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().timestamp();
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut pos = 0;

        buf[pos..pos + 8].copy_from_slice(MAGIC);
        pos += 8;
        buf[pos..pos + 4].copy_from_slice(&self.version.to_le_bytes());
        pos += 4;
        buf[pos] = self.compression.flag();
        pos += 4;
        buf[pos..pos + 4].copy_from_slice(&self.compression.level().to_le_bytes());
        pos += 4;
        buf[pos..pos + 8].copy_from_slice(&self.body_len.to_le_bytes());
        pos += 8;
        buf[pos..pos + 8].copy_from_slice(&self.raw_len.to_le_bytes());
        pos += 8;
        buf[pos..pos + 4].copy_from_slice(&self.body_crc.to_le_bytes());
        pos += 4;
        buf[pos..pos + 8].copy_from_slice(&self.created_at.to_le_bytes());
        pos += 8;
        buf[pos..pos + 8].copy_from_slice(&self.modified_at.to_le_bytes());
        pos += 8;

        // Checksum over everything before it
        let checksum = crc32fast::hash(&buf[0..pos]);
        buf[pos..pos + 4].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "container header truncated"));
        }
        if &bytes[0..8] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid container magic"));
        }

        let mut cursor = Cursor::new(&bytes[8..HEADER_SIZE]);
        let version = cursor.read_u32::<LittleEndian>()?;
        let flag = cursor.read_u8()?;
        let mut pad = [0u8; 3];
        cursor.read_exact(&mut pad)?;
        let level = cursor.read_i32::<LittleEndian>()?;
        let body_len = cursor.read_u64::<LittleEndian>()?;
        let raw_len = cursor.read_u64::<LittleEndian>()?;
        let body_crc = cursor.read_u32::<LittleEndian>()?;
        let created_at = cursor.read_i64::<LittleEndian>()?;
        let modified_at = cursor.read_i64::<LittleEndian>()?;
        let checksum_pos = 8 + cursor.position() as usize;
        let checksum = cursor.read_u32::<LittleEndian>()?;

        if crc32fast::hash(&bytes[0..checksum_pos]) != checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "container header checksum mismatch",
            ));
        }
        if version > FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported container version {} (max {})", version, FORMAT_VERSION),
            ));
        }

        Ok(Self {
            version,
            compression: Compression::from_parts(flag, level)?,
            body_len,
            raw_len,
            body_crc,
            created_at,
            modified_at,
        })
    }
}
