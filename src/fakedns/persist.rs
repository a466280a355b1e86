//! Fake-DNS cache file
//!
//! Plain text: line 1 is the numeric cursor, every following line is
//! `<uint32-ip>,<domain>`. Loading is all-or-nothing: any malformed line
//! aborts the whole restore.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::error::PersistenceError;

/// State read from or written to the cache file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingState {
    /// Raw cursor value
    pub cursor: u32,
    /// Slot -> domain bindings
    pub slots: HashMap<u32, String>,
}

/// Parse cache file contents, requiring every value to lie in `[min, max]`
///
/// # Errors
///
/// Returns `PersistenceError::Malformed` on the first offending line.
pub fn parse(contents: &str, min: u32, max: u32) -> Result<RingState, PersistenceError> {
    let in_range = |v: u32| (min..=max).contains(&v);
    let mut lines = contents.lines();

    let first = lines
        .next()
        .ok_or_else(|| PersistenceError::malformed(1, "missing cursor line"))?;
    let cursor: u32 = first
        .trim()
        .parse()
        .map_err(|e| PersistenceError::malformed(1, format!("invalid cursor {first:?}: {e}")))?;
    if !in_range(cursor) {
        return Err(PersistenceError::malformed(
            1,
            format!("cursor {cursor} outside configured range"),
        ));
    }

    let mut slots = HashMap::new();
    for (idx, line) in lines.enumerate() {
        let lineno = idx + 2;
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 2 {
            return Err(PersistenceError::malformed(lineno, "expected <ip>,<domain>"));
        }
        let slot: u32 = parts[0].parse().map_err(|e| {
            PersistenceError::malformed(lineno, format!("invalid ip {:?}: {e}", parts[0]))
        })?;
        if !in_range(slot) {
            return Err(PersistenceError::malformed(
                lineno,
                format!("ip {slot} outside configured range"),
            ));
        }
        if parts[1].is_empty() {
            return Err(PersistenceError::malformed(lineno, "empty domain"));
        }
        slots.insert(slot, parts[1].to_string());
    }

    Ok(RingState { cursor, slots })
}

/// Render a state in cache file format, bindings ordered by slot
#[must_use]
pub fn render(cursor: u32, bindings: &[(u32, String)]) -> String {
    let mut out = format!("{cursor}\n");
    for (slot, domain) in bindings {
        out.push_str(&format!("{slot},{domain}\n"));
    }
    out
}

/// Load and parse the cache file at `path`
///
/// # Errors
///
/// Returns an I/O or format error; nothing is partially applied.
pub fn load(path: &Path, min: u32, max: u32) -> Result<RingState, PersistenceError> {
    let contents = fs::read_to_string(path)?;
    parse(&contents, min, max)
}

/// Write the cache file, replacing any previous one
///
/// The contents go to a sibling temporary file first and are renamed into
/// place, so a crash never leaves a truncated cache behind.
///
/// # Errors
///
/// Returns an I/O error if writing or renaming fails.
pub fn save(path: &Path, cursor: u32, bindings: &[(u32, String)]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("cache.tmp");
    fs::write(&tmp, render(cursor, bindings))?;
    fs::rename(&tmp, path)?;
    Ok(())
}
