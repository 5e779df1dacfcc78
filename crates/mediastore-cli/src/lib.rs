use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

/// Cutoff timestamp `hours` before `now`.
pub fn cutoff_before(now: DateTime<Utc>, hours: u64) -> anyhow::Result<DateTime<Utc>> {
    i64::try_from(hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--older-than-hours {} is out of range", hours))
}

/// Render a byte count with a binary unit, e.g. `1.5 MiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
