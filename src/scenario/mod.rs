//! Scenario input: the system and nodes CSV files and their validation.

pub mod nodes;
pub mod system;

use anyhow::{Context, anyhow};

/// Split one CSV data row on commas, trimming whitespace.
fn fields(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

/// Parse field `ix` of a row as `T`, naming the column on failure.
fn parse_field<T: std::str::FromStr>(row: &[&str], ix: usize, name: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = row
        .get(ix)
        .ok_or_else(|| anyhow!("missing column {ix} ({name})"))?;
    raw.parse::<T>()
        .with_context(|| format!("bad value '{raw}' in column {ix} ({name})"))
}

/// First non-empty data row of a CSV document (the header is skipped).
fn data_rows(content: &str) -> Vec<&str> {
    content
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect()
}
