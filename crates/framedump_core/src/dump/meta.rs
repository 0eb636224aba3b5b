//! Dump meta side file.
//!
//! Written at close, read at open. The stamp ties the meta to the exact
//! dump file state it describes; a mismatch (crash, external edit)
//! means the cached record count and deletions are stale and the dump
//! falls back to a full scan.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use framedump_codec::Schema;

use crate::error::{CoreError, CoreResult};

const MAGIC: &[u8; 4] = b"FDMP";
const VERSION: u8 = 1;

/// Fingerprint of a dump file's state at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpStamp {
    /// Live records in the dump.
    pub record_count: u64,
    /// Total dump file size in bytes.
    pub dump_size: u64,
}

/// One schema field as recorded in the meta file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaField {
    /// Field tag.
    pub tag: u16,
    /// Shallow wire-kind code, see [`FieldKind::fingerprint_code`].
    ///
    /// [`FieldKind::fingerprint_code`]: framedump_codec::FieldKind::fingerprint_code
    pub kind_code: u8,
    /// Field name.
    pub name: String,
}

/// Contents of the `.meta` side file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpMeta {
    /// State fingerprint at write time.
    pub stamp: DumpStamp,
    /// Schema of the records at write time, for offline inspection.
    pub fields: Vec<MetaField>,
}

impl DumpMeta {
    /// Builds a meta snapshot from the current state and schema.
    #[must_use]
    pub fn capture(stamp: DumpStamp, schema: &Schema) -> Self {
        let fields = schema
            .fields
            .iter()
            .map(|f| MetaField {
                tag: f.tag,
                kind_code: f.kind.fingerprint_code(),
                name: f.name.to_string(),
            })
            .collect();
        Self { stamp, fields }
    }

    /// Loads the meta file. Returns `None` if the file does not exist.
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
        Self::parse(&bytes).map(Some)
    }

    fn parse(bytes: &[u8]) -> CoreResult<Self> {
        let truncated = || CoreError::invalid_format("meta file truncated");
        let mut cursor = bytes;

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(|_| truncated())?;
        if &magic != MAGIC {
            return Err(CoreError::invalid_format("bad meta file magic"));
        }
        let mut version = [0u8; 1];
        cursor.read_exact(&mut version).map_err(|_| truncated())?;
        if version[0] != VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported meta file version {}",
                version[0]
            )));
        }

        let mut u64_buf = [0u8; 8];
        cursor.read_exact(&mut u64_buf).map_err(|_| truncated())?;
        let record_count = u64::from_le_bytes(u64_buf);
        cursor.read_exact(&mut u64_buf).map_err(|_| truncated())?;
        let dump_size = u64::from_le_bytes(u64_buf);

        let mut u16_buf = [0u8; 2];
        cursor.read_exact(&mut u16_buf).map_err(|_| truncated())?;
        let field_count = u16::from_le_bytes(u16_buf) as usize;

        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            cursor.read_exact(&mut u16_buf).map_err(|_| truncated())?;
            let tag = u16::from_le_bytes(u16_buf);
            let mut code = [0u8; 1];
            cursor.read_exact(&mut code).map_err(|_| truncated())?;
            let mut len_buf = [0u8; 2];
            cursor.read_exact(&mut len_buf).map_err(|_| truncated())?;
            let name_len = u16::from_le_bytes(len_buf) as usize;
            if cursor.len() < name_len {
                return Err(truncated());
            }
            let (name_bytes, rest) = cursor.split_at(name_len);
            cursor = rest;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| CoreError::invalid_format("meta field name is not UTF-8"))?
                .to_string();
            fields.push(MetaField {
                tag,
                kind_code: code[0],
                name,
            });
        }

        Ok(Self {
            stamp: DumpStamp {
                record_count,
                dump_size,
            },
            fields,
        })
    }

    /// Writes the meta file, replacing any previous contents.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&self.stamp.record_count.to_le_bytes());
        buf.extend_from_slice(&self.stamp.dump_size.to_le_bytes());
        buf.extend_from_slice(&(self.fields.len() as u16).to_le_bytes());
        for field in &self.fields {
            buf.extend_from_slice(&field.tag.to_le_bytes());
            buf.push(field.kind_code);
            buf.extend_from_slice(&(field.name.len() as u16).to_le_bytes());
            buf.extend_from_slice(field.name.as_bytes());
        }

        let mut file = fs::File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framedump_codec::{FieldDescriptor, FieldKind};

    static SCHEMA: Schema = Schema::new(
        "event",
        &[
            FieldDescriptor::new(1, "id", FieldKind::I64),
            FieldDescriptor::new(2, "label", FieldKind::Str),
        ],
    );

    #[test]
    fn capture_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.meta");

        let meta = DumpMeta::capture(
            DumpStamp {
                record_count: 42,
                dump_size: 9001,
            },
            &SCHEMA,
        );
        meta.save(&path).unwrap();

        let loaded = DumpMeta::load(&path).unwrap().unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.fields.len(), 2);
        assert_eq!(loaded.fields[1].name, "label");
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DumpMeta::load(&dir.path().join("nope.meta"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.meta");
        fs::write(&path, b"NOPE\x01").unwrap();
        assert!(matches!(
            DumpMeta::load(&path),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
