//! Per-namespace segment interner.
//!
//! Maps dotted-path segments to dense integers so programs can compare
//! integers instead of strings. Id 0 is reserved for the root; real segments
//! start at 1. Reverse lookup exists for diagnostics only.

use std::collections::HashMap;
use thiserror::Error;

/// Id of the (unnamed) root node.
pub const ROOT_SEGMENT: u32 = 0;

/// Placeholder for a segment the interner has never seen.
///
/// Never assigned to a real segment, so a program walk stops on it.
pub const UNKNOWN_SEGMENT: u32 = u32::MAX;

/// A local path contained an empty segment (leading, trailing or double dot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("empty segment at byte {0}")]
pub struct EmptySegment(pub usize);

/// Segment string <-> id table for one namespace.
#[derive(Debug, Clone)]
pub struct Interner {
    ids: HashMap<Box<str>, u32>,
    names: Vec<Box<str>>,
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            names: vec![Box::from("")],
        }
    }

    /// Number of interned segments, excluding the root.
    #[inline]
    pub fn len(&self) -> u32 {
        (self.names.len() - 1) as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.len() == 1
    }

    /// Return the id for `segment`, assigning the next one if it is new.
    pub fn intern(&mut self, segment: &str) -> u32 {
        if let Some(&id) = self.ids.get(segment) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(Box::from(segment));
        self.ids.insert(Box::from(segment), id);
        id
    }

    #[inline]
    pub fn get(&self, segment: &str) -> Option<u32> {
        self.ids.get(segment).copied()
    }

    /// Reverse lookup. Diagnostics only.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(|s| &**s)
    }

    /// Compile a local path, interning every segment.
    ///
    /// The empty local compiles to the empty (root) path.
    pub fn compile_local(&mut self, local: &str) -> Result<Vec<u32>, EmptySegment> {
        let mut path = Vec::with_capacity(segment_hint(local));
        scan_segments(local, |seg| path.push(self.intern(seg)))?;
        Ok(path)
    }

    /// Compile a local path without growing the table.
    ///
    /// Unseen segments become [`UNKNOWN_SEGMENT`]; the flag reports whether
    /// every segment was known.
    pub fn lookup_local(&self, local: &str) -> Result<(Vec<u32>, bool), EmptySegment> {
        let mut path = Vec::with_capacity(segment_hint(local));
        let mut complete = true;
        scan_segments(local, |seg| match self.get(seg) {
            Some(id) => path.push(id),
            None => {
                complete = false;
                path.push(UNKNOWN_SEGMENT);
            }
        })?;
        Ok((path, complete))
    }

    /// Render a compiled path back to dotted form. Diagnostics only.
    pub fn render(&self, path: &[u32]) -> String {
        let mut out = String::new();
        for (i, &id) in path.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            out.push_str(self.name(id).unwrap_or("?"));
        }
        out
    }
}

/// Walk the dot-separated segments of `local` in a single pass.
///
/// The empty string has zero segments.
pub fn scan_segments(local: &str, mut f: impl FnMut(&str)) -> Result<(), EmptySegment> {
    if local.is_empty() {
        return Ok(());
    }
    let bytes = local.as_bytes();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'.' {
            if i == start {
                return Err(EmptySegment(i));
            }
            f(&local[start..i]);
            start = i + 1;
        }
    }
    if start == bytes.len() {
        return Err(EmptySegment(start));
    }
    f(&local[start..]);
    Ok(())
}

#[inline]
fn segment_hint(local: &str) -> usize {
    local.bytes().filter(|&b| b == b'.').count() + 1
}
