//! Skip/limit windowing
//!
//! A pure post-filter over a match sequence. A positive `skip` drops that
//! many leading matches; a negative `skip` keeps only the last `|skip|`
//! matches. `limit` then caps the number of returned matches. The total
//! number of matches is always counted, so the sequence is drained.

use std::collections::VecDeque;
use std::ops::Range;

/// Skip/limit parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    /// Matches to skip; negative counts from the end
    pub skip: i64,
    /// Maximum number of matches to return
    pub limit: Option<usize>,
}

/// Windowed matches plus the number of matches before windowing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Returned matches
    pub items: Vec<T>,
    /// Matches before windowing
    pub total: usize,
}

impl Window {
    /// Everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Window with explicit parameters
    pub fn new(skip: i64, limit: Option<usize>) -> Self {
        Self { skip, limit }
    }

    /// Positions `[start, end)` kept out of `len` matches
    pub fn slice(&self, len: usize) -> Range<usize> {
        let start = if self.skip >= 0 {
            (self.skip as u64).min(len as u64) as usize
        } else {
            let back = self.skip.unsigned_abs();
            if back < len as u64 {
                len - back as usize
            } else {
                0
            }
        };
        let end = match self.limit {
            Some(limit) => start.saturating_add(limit).min(len),
            None => len,
        };
        start..end
    }

    /// Apply the window to a match sequence
    pub fn apply<T>(&self, matches: impl Iterator<Item = T>) -> Page<T> {
        if self.limit == Some(0) {
            return Page {
                items: Vec::new(),
                total: matches.count(),
            };
        }
        if self.skip >= 0 {
            let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
            let mut total = 0;
            let mut items = Vec::new();
            for item in matches {
                if total >= skip && self.limit.map_or(true, |l| items.len() < l) {
                    items.push(item);
                }
                total += 1;
            }
            return Page { items, total };
        }

        // Keep the last |skip| matches in a ring buffer.
        let keep = usize::try_from(self.skip.unsigned_abs()).unwrap_or(usize::MAX);
        let mut tail = VecDeque::new();
        let mut total = 0;
        for item in matches {
            if tail.len() == keep {
                tail.pop_front();
            }
            tail.push_back(item);
            total += 1;
        }
        let mut items: Vec<T> = tail.into_iter().collect();
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        Page { items, total }
    }
}
