//! Index side-file formats.
//!
//! Every index persists three files next to the dump:
//!
//! - `.meta` — kind, field, and the dump stamp the persisted state
//!   reflects; a stamp mismatch at attach forces a rebuild
//! - `.lookup` — the full key table
//! - `.updates` — an append-only op log of changes since the lookup was
//!   last rewritten, so a close with few changes does not rewrite a
//!   large lookup file

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::dump::DumpStamp;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexKind;

const META_MAGIC: &[u8; 4] = b"FDIX";
const LOOKUP_MAGIC: &[u8; 4] = b"FDLK";
const VERSION: u8 = 1;

/// Contents of an index `.meta` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    /// Index kind.
    pub kind: IndexKind,
    /// Tag of the indexed field.
    pub tag: u16,
    /// Name of the indexed field.
    pub field: String,
    /// Dump state the persisted lookup and updates reflect.
    pub stamp: DumpStamp,
    /// Bucket count for infinite indexes, zero otherwise.
    pub bucket_count: u32,
}

impl IndexMeta {
    /// Loads an index meta file. Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or a malformed file.
    pub fn load(path: &Path) -> CoreResult<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let truncated = || CoreError::invalid_format("index meta truncated");
        let mut cursor = &bytes[..];

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(|_| truncated())?;
        if &magic != META_MAGIC {
            return Err(CoreError::invalid_format("bad index meta magic"));
        }
        let mut byte = [0u8; 1];
        cursor.read_exact(&mut byte).map_err(|_| truncated())?;
        if byte[0] != VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported index meta version {}",
                byte[0]
            )));
        }
        cursor.read_exact(&mut byte).map_err(|_| truncated())?;
        let kind = IndexKind::from_code(byte[0])
            .ok_or_else(|| CoreError::invalid_format("unknown index kind"))?;

        let mut u16_buf = [0u8; 2];
        cursor.read_exact(&mut u16_buf).map_err(|_| truncated())?;
        let tag = u16::from_le_bytes(u16_buf);

        let mut u64_buf = [0u8; 8];
        cursor.read_exact(&mut u64_buf).map_err(|_| truncated())?;
        let record_count = u64::from_le_bytes(u64_buf);
        cursor.read_exact(&mut u64_buf).map_err(|_| truncated())?;
        let dump_size = u64::from_le_bytes(u64_buf);

        let mut u32_buf = [0u8; 4];
        cursor.read_exact(&mut u32_buf).map_err(|_| truncated())?;
        let bucket_count = u32::from_le_bytes(u32_buf);

        cursor.read_exact(&mut u16_buf).map_err(|_| truncated())?;
        let name_len = u16::from_le_bytes(u16_buf) as usize;
        if cursor.len() != name_len {
            return Err(truncated());
        }
        let field = std::str::from_utf8(cursor)
            .map_err(|_| CoreError::invalid_format("index field name is not UTF-8"))?
            .to_string();

        Ok(Some(Self {
            kind,
            tag,
            field,
            stamp: DumpStamp {
                record_count,
                dump_size,
            },
            bucket_count,
        }))
    }

    /// Writes the meta file, replacing any previous contents.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(META_MAGIC);
        buf.push(VERSION);
        buf.push(self.kind.code());
        buf.extend_from_slice(&self.tag.to_le_bytes());
        buf.extend_from_slice(&self.stamp.record_count.to_le_bytes());
        buf.extend_from_slice(&self.stamp.dump_size.to_le_bytes());
        buf.extend_from_slice(&self.bucket_count.to_le_bytes());
        buf.extend_from_slice(&(self.field.len() as u16).to_le_bytes());
        buf.extend_from_slice(self.field.as_bytes());

        let mut file = fs::File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }
}

/// Writes a full lookup file: every key with its position list.
///
/// # Errors
///
/// Fails on I/O errors.
pub fn write_lookup<'a>(
    path: &Path,
    entries: impl Iterator<Item = (&'a [u8], &'a [u64])>,
) -> CoreResult<()> {
    let mut file = io::BufWriter::new(fs::File::create(path)?);
    file.write_all(LOOKUP_MAGIC)?;
    file.write_all(&[VERSION])?;

    let mut count = 0u32;
    let mut body = Vec::new();
    for (key, positions) in entries {
        body.extend_from_slice(&(key.len() as u32).to_le_bytes());
        body.extend_from_slice(key);
        body.extend_from_slice(&(positions.len() as u32).to_le_bytes());
        for pos in positions {
            body.extend_from_slice(&pos.to_le_bytes());
        }
        count += 1;
    }
    file.write_all(&count.to_le_bytes())?;
    file.write_all(&body)?;
    let file = file.into_inner().map_err(|e| CoreError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(())
}

/// Reads a full lookup file.
///
/// # Errors
///
/// Fails on I/O errors or a malformed file.
pub fn read_lookup(path: &Path) -> CoreResult<Vec<(Vec<u8>, Vec<u64>)>> {
    let bytes = fs::read(path)?;
    let truncated = || CoreError::invalid_format("lookup file truncated");
    let mut cursor = &bytes[..];

    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic).map_err(|_| truncated())?;
    if &magic != LOOKUP_MAGIC {
        return Err(CoreError::invalid_format("bad lookup file magic"));
    }
    let mut version = [0u8; 1];
    cursor.read_exact(&mut version).map_err(|_| truncated())?;
    if version[0] != VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported lookup file version {}",
            version[0]
        )));
    }
    let mut u32_buf = [0u8; 4];
    cursor.read_exact(&mut u32_buf).map_err(|_| truncated())?;
    let count = u32::from_le_bytes(u32_buf) as usize;

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        cursor.read_exact(&mut u32_buf).map_err(|_| truncated())?;
        let key_len = u32::from_le_bytes(u32_buf) as usize;
        if cursor.len() < key_len {
            return Err(truncated());
        }
        let (key, rest) = cursor.split_at(key_len);
        cursor = rest;

        cursor.read_exact(&mut u32_buf).map_err(|_| truncated())?;
        let npos = u32::from_le_bytes(u32_buf) as usize;
        if cursor.len() < npos * 8 {
            return Err(truncated());
        }
        let mut positions = Vec::with_capacity(npos);
        let mut u64_buf = [0u8; 8];
        for _ in 0..npos {
            cursor.read_exact(&mut u64_buf)?;
            positions.push(u64::from_le_bytes(u64_buf));
        }
        entries.push((key.to_vec(), positions));
    }
    Ok(entries)
}

/// A single entry in the `.updates` op log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOp {
    /// Position added under the key.
    Add { key: Vec<u8>, pos: u64 },
    /// Position removed from under the key.
    Remove { key: Vec<u8>, pos: u64 },
}

impl UpdateOp {
    fn code(&self) -> u8 {
        match self {
            UpdateOp::Add { .. } => 1,
            UpdateOp::Remove { .. } => 2,
        }
    }

    fn key(&self) -> &[u8] {
        match self {
            UpdateOp::Add { key, .. } | UpdateOp::Remove { key, .. } => key,
        }
    }

    fn pos(&self) -> u64 {
        match self {
            UpdateOp::Add { pos, .. } | UpdateOp::Remove { pos, .. } => *pos,
        }
    }
}

/// Appends ops to the `.updates` log, creating it if needed.
///
/// # Errors
///
/// Fails on I/O errors.
pub fn append_updates(path: &Path, ops: &[UpdateOp]) -> CoreResult<()> {
    let mut buf = Vec::new();
    for op in ops {
        buf.push(op.code());
        buf.extend_from_slice(&(op.key().len() as u32).to_le_bytes());
        buf.extend_from_slice(op.key());
        buf.extend_from_slice(&op.pos().to_le_bytes());
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    file.sync_all()?;
    Ok(())
}

/// Reads the whole `.updates` log. A missing file is an empty log.
///
/// # Errors
///
/// Fails on I/O errors or a malformed log.
pub fn read_updates(path: &Path) -> CoreResult<Vec<UpdateOp>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let truncated = || CoreError::invalid_format("updates log truncated");
    let mut cursor = &bytes[..];
    let mut ops = Vec::new();

    while !cursor.is_empty() {
        let mut code = [0u8; 1];
        cursor.read_exact(&mut code).map_err(|_| truncated())?;
        let mut u32_buf = [0u8; 4];
        cursor.read_exact(&mut u32_buf).map_err(|_| truncated())?;
        let key_len = u32::from_le_bytes(u32_buf) as usize;
        if cursor.len() < key_len + 8 {
            return Err(truncated());
        }
        let (key, rest) = cursor.split_at(key_len);
        let key = key.to_vec();
        cursor = rest;
        let mut u64_buf = [0u8; 8];
        cursor.read_exact(&mut u64_buf)?;
        let pos = u64::from_le_bytes(u64_buf);

        ops.push(match code[0] {
            1 => UpdateOp::Add { key, pos },
            2 => UpdateOp::Remove { key, pos },
            other => {
                return Err(CoreError::invalid_format(format!(
                    "unknown updates log op {other}"
                )))
            }
        });
    }
    Ok(ops)
}

/// Deletes the `.updates` log if present.
///
/// # Errors
///
/// Fails on I/O errors other than the file being absent.
pub fn clear_updates(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.id.meta");
        let meta = IndexMeta {
            kind: IndexKind::Group,
            tag: 3,
            field: "label".into(),
            stamp: DumpStamp {
                record_count: 10,
                dump_size: 1234,
            },
            bucket_count: 0,
        };
        meta.save(&path).unwrap();
        assert_eq!(IndexMeta::load(&path).unwrap().unwrap(), meta);
    }

    #[test]
    fn missing_meta_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IndexMeta::load(&dir.path().join("absent.meta"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn lookup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.id.lookup");

        let entries: Vec<(Vec<u8>, Vec<u64>)> = vec![
            (b"alpha".to_vec(), vec![0]),
            (b"beta".to_vec(), vec![16, 48, 80]),
        ];
        write_lookup(
            &path,
            entries.iter().map(|(k, p)| (k.as_slice(), p.as_slice())),
        )
        .unwrap();

        assert_eq!(read_lookup(&path).unwrap(), entries);
    }

    #[test]
    fn updates_log_appends_and_replays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.id.updates");

        assert!(read_updates(&path).unwrap().is_empty());

        let first = vec![UpdateOp::Add {
            key: b"k".to_vec(),
            pos: 4,
        }];
        let second = vec![UpdateOp::Remove {
            key: b"k".to_vec(),
            pos: 4,
        }];
        append_updates(&path, &first).unwrap();
        append_updates(&path, &second).unwrap();

        let ops = read_updates(&path).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], first[0]);
        assert_eq!(ops[1], second[0]);

        clear_updates(&path).unwrap();
        assert!(read_updates(&path).unwrap().is_empty());
        clear_updates(&path).unwrap();
    }

    #[test]
    fn truncated_lookup_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.id.lookup");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(LOOKUP_MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"ab"); // key shorter than declared
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            read_lookup(&path),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
