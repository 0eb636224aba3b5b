//! Inspect command implementation.

use framedump_core::{discover, DumpMeta, IndexKind};
use framedump_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::Path;

use super::{scan_frames, side_path};

/// Dump inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Dump file path.
    pub path: String,
    /// Dump file size in bytes.
    pub size: u64,
    /// Number of live records.
    pub live_records: u64,
    /// Number of tombstoned records.
    pub tombstones: u64,
    /// Bytes a prune would reclaim.
    pub reclaimable_bytes: u64,
    /// Bytes after the last plausible frame.
    pub trailing_bytes: u64,
    /// Stamp recorded by the last clean close, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<StampInfo>,
    /// Recorded schema fields (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<FieldInfo>>,
    /// Discovered index side files (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexes: Option<Vec<IndexInfo>>,
}

/// Stamp from the `.meta` side file.
#[derive(Debug, Serialize)]
pub struct StampInfo {
    /// Record count at write time.
    pub record_count: u64,
    /// Dump size at write time.
    pub dump_size: u64,
    /// Whether the stamp still matches the file.
    pub current: bool,
}

/// One recorded schema field.
#[derive(Debug, Serialize)]
pub struct FieldInfo {
    /// Field tag.
    pub tag: u16,
    /// Wire-kind name.
    pub kind: &'static str,
    /// Field name.
    pub name: String,
}

/// One discovered index.
#[derive(Debug, Serialize)]
pub struct IndexInfo {
    /// Indexed field name.
    pub field: String,
    /// Index kind.
    pub kind: &'static str,
    /// Bucket count, for infinite indexes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_count: Option<u32>,
    /// Whether the persisted index matches the current dump state.
    pub current: bool,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_schema: bool,
    show_indexes: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No dump found at {:?}", path).into());
    }

    let backend = FileBackend::open(path)?;
    let size = backend.size()?;
    let scan = scan_frames(&backend)?;

    let meta = DumpMeta::load(&side_path(path, "meta"))?;
    let stamp = meta.as_ref().map(|m| StampInfo {
        record_count: m.stamp.record_count,
        dump_size: m.stamp.dump_size,
        current: m.stamp.record_count == scan.live && m.stamp.dump_size == size,
    });
    let schema = if show_schema {
        meta.as_ref().map(|m| {
            m.fields
                .iter()
                .map(|f| FieldInfo {
                    tag: f.tag,
                    kind: kind_label(f.kind_code),
                    name: f.name.clone(),
                })
                .collect()
        })
    } else {
        None
    };

    let indexes = if show_indexes {
        let found = discover(path)?;
        Some(
            found
                .into_iter()
                .map(|d| IndexInfo {
                    field: d.field,
                    kind: d.kind.name(),
                    bucket_count: match d.kind {
                        IndexKind::Infinite => Some(d.bucket_count),
                        _ => None,
                    },
                    current: d.stamp.record_count == scan.live && d.stamp.dump_size == size,
                })
                .collect(),
        )
    } else {
        None
    };

    let result = InspectResult {
        path: path.display().to_string(),
        size,
        live_records: scan.live,
        tombstones: scan.tombstones,
        reclaimable_bytes: scan.tombstoned_bytes,
        trailing_bytes: scan.trailing_bytes,
        stamp,
        schema,
        indexes,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn kind_label(code: u8) -> &'static str {
    match code {
        1 => "bool",
        2 => "byte",
        3 => "char",
        4 => "i32",
        5 => "i64",
        6 => "f32",
        7 => "f64",
        8 => "str",
        9 => "date",
        10 => "uuid",
        11 => "enum",
        12 => "enum-set",
        13 => "list",
        14 => "set",
        15 => "record",
        _ => "unknown",
    }
}

fn print_text_output(result: &InspectResult) {
    println!("Dump Inspection");
    println!("===============");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  File size:    {}", format_size(result.size));
    println!("  Reclaimable:  {}", format_size(result.reclaimable_bytes));
    if result.trailing_bytes > 0 {
        println!("  Trailing:     {} (malformed tail)", format_size(result.trailing_bytes));
    }
    println!();
    println!("Records:");
    println!("  Live:       {}", result.live_records);
    println!("  Tombstones: {}", result.tombstones);

    match &result.stamp {
        Some(stamp) => {
            println!();
            println!("Last clean close:");
            println!("  Records: {}", stamp.record_count);
            println!("  Size:    {}", format_size(stamp.dump_size));
            println!("  Current: {}", if stamp.current { "yes" } else { "no (will rescan)" });
        }
        None => {
            println!();
            println!("No meta side file (next open will rescan).");
        }
    }

    if let Some(schema) = &result.schema {
        println!();
        println!("Schema:");
        for field in schema {
            println!("  [{}] {} ({})", field.tag, field.name, field.kind);
        }
    }

    if let Some(indexes) = &result.indexes {
        println!();
        println!("Indexes:");
        if indexes.is_empty() {
            println!("  (none)");
        }
        for index in indexes {
            let buckets = match index.bucket_count {
                Some(n) => format!(", {} buckets", n),
                None => String::new(),
            };
            println!(
                "  {} ({}{}) {}",
                index.field,
                index.kind,
                buckets,
                if index.current { "current" } else { "stale" }
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
