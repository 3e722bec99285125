//! Reassembly of fragmented log messages.
//!
//! The runtime splits long lines into multiple records sharing a partial
//! group id. Fragments may arrive out of order; the group is assembled in
//! ascending ordinal order when its `last` fragment arrives.

use std::collections::HashMap;

use crate::logs::decoder::LogRecord;
use crate::logs::StreamSource;

/// A whole logical line, either a single non-partial record or a completed
/// fragment group. Source and time come from the group's first-buffered
/// fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledLine {
    pub line: Vec<u8>,
    pub source: StreamSource,
    pub time_nano: i64,
}

struct PartialGroup {
    source: StreamSource,
    time_nano: i64,
    parts: Vec<(i32, Vec<u8>)>,
}

/// Buffers partial fragment groups keyed by their id.
///
/// There is no timeout for open groups; the producer guarantees an eventual
/// `last` fragment or stream closure.
pub struct Reassembler {
    groups: HashMap<String, PartialGroup>,
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler {
            groups: HashMap::new(),
        }
    }

    /// Feeds one record. Returns the completed line, or `None` if the record
    /// was buffered as a fragment of a still-open group.
    ///
    /// A record flagged partial but carrying no metadata is treated as a
    /// complete line rather than dropped.
    pub fn push(&mut self, record: &LogRecord) -> Option<ReassembledLine> {
        let source = StreamSource::from_wire(&record.source);

        if !record.partial {
            return Some(ReassembledLine {
                line: record.line.clone(),
                source,
                time_nano: record.time_nano,
            });
        }
        let Some(meta) = &record.partial_metadata else {
            return Some(ReassembledLine {
                line: record.line.clone(),
                source,
                time_nano: record.time_nano,
            });
        };

        let group = self
            .groups
            .entry(meta.id.clone())
            .or_insert_with(|| PartialGroup {
                source,
                time_nano: record.time_nano,
                parts: Vec::new(),
            });
        group.parts.push((meta.ordinal, record.line.clone()));

        if !meta.last {
            return None;
        }

        let mut group = self.groups.remove(&meta.id)?;
        group.parts.sort_by_key(|(ordinal, _)| *ordinal);

        let total: usize = group.parts.iter().map(|(_, data)| data.len()).sum();
        let mut line = Vec::with_capacity(total);
        for (_, data) in &group.parts {
            line.extend_from_slice(data);
        }

        Some(ReassembledLine {
            line,
            source: group.source,
            time_nano: group.time_nano,
        })
    }

    /// Number of fragment groups currently buffered.
    pub fn open_groups(&self) -> usize {
        self.groups.len()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}
