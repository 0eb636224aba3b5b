//! Repair command implementation.

use framedump_core::cleanup;
use std::path::Path;

/// Runs the repair command.
///
/// Salvages readable records from `path` into a fresh dump at `output`.
/// The source is never modified.
pub fn run(path: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No dump found at {:?}", path).into());
    }
    if path == output {
        return Err("Output path must differ from the source dump".into());
    }
    if output.exists() {
        return Err(format!("Output {:?} already exists", output).into());
    }

    let report = cleanup(path, output)?;

    println!("Repair complete: {:?} -> {:?}", path, output);
    println!("  Frames scanned:   {}", report.scanned);
    println!("  Records salvaged: {}", report.salvaged);
    println!("  Frames skipped:   {}", report.skipped);
    if report.bytes_lost > 0 {
        println!("  Bytes abandoned:  {}", report.bytes_lost);
    }

    Ok(())
}
