//! Prune command implementation.

use framedump_core::{cleanup, discover};
use framedump_storage::FileBackend;
use std::fs;
use std::path::Path;
use tracing::info;

use super::{scan_frames, side_path};

/// Runs the prune command.
///
/// Rewrites the dump without tombstones and removes the now-stale side
/// files. Positions change, so persisted index files are deleted and
/// rebuilt on the next attach. The dump must not be open elsewhere.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No dump found at {:?}", path).into());
    }

    let (live, reclaimable, trailing) = {
        let backend = FileBackend::open(path)?;
        let scan = scan_frames(&backend)?;
        (scan.live, scan.tombstoned_bytes, scan.trailing_bytes)
    };

    println!("Live records:      {}", live);
    println!("Reclaimable bytes: {}", reclaimable + trailing);

    if dry_run {
        println!("Dry run, nothing written.");
        return Ok(());
    }
    if reclaimable + trailing == 0 {
        println!("Nothing to reclaim.");
        return Ok(());
    }

    let staged = side_path(path, "prune-tmp");
    let report = cleanup(path, &staged)?;
    if report.salvaged != live {
        fs::remove_file(&staged)?;
        return Err(format!(
            "Refusing to prune: {} of {} live records decoded; run repair instead",
            report.salvaged, live
        )
        .into());
    }
    fs::rename(&staged, path)?;

    // Positions moved, so every side file is stale.
    remove_if_present(&side_path(path, "meta"))?;
    remove_if_present(&side_path(path, "deletions"))?;
    for index in discover(path)? {
        remove_if_present(&side_path(path, &format!("{}.meta", index.field)))?;
        remove_if_present(&side_path(path, &format!("{}.lookup", index.field)))?;
        remove_if_present(&side_path(path, &format!("{}.updates", index.field)))?;
    }

    println!(
        "Pruned: kept {} records, reclaimed {} bytes",
        report.salvaged,
        reclaimable + trailing
    );
    Ok(())
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "removed stale side file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
