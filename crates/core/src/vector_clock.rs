use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::entry::ChangeEntry;
use crate::hlc::Hlc;
use crate::ids::WriterId;

/// Newest timestamp seen from each writer in a catalog copy's log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    entries: BTreeMap<WriterId, Hlc>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_log<'a>(log: impl IntoIterator<Item = &'a ChangeEntry>) -> Self {
        let mut vc = Self::new();
        for entry in log {
            vc.observe(entry.writer, entry.hlc);
        }
        vc
    }

    /// Keeps the max HLC per writer.
    pub fn observe(&mut self, writer: WriterId, hlc: Hlc) {
        self.entries
            .entry(writer)
            .and_modify(|seen| {
                if hlc > *seen {
                    *seen = hlc;
                }
            })
            .or_insert(hlc);
    }

    pub fn get(&self, writer: &WriterId) -> Option<Hlc> {
        self.entries.get(writer).copied()
    }

    pub fn merge(&mut self, other: &VectorClock) {
        for (writer, hlc) in &other.entries {
            self.observe(*writer, *hlc);
        }
    }

    /// Writers for which `other` has seen something newer than we have.
    pub fn behind(&self, other: &VectorClock) -> Vec<(WriterId, Option<Hlc>)> {
        other
            .entries
            .iter()
            .filter_map(|(writer, theirs)| match self.entries.get(writer) {
                Some(ours) if ours >= theirs => None,
                ours => Some((*writer, ours.copied())),
            })
            .collect()
    }

    pub fn covers(&self, other: &VectorClock) -> bool {
        self.behind(other).is_empty()
    }

    /// Newest timestamp across all writers.
    pub fn max_hlc(&self) -> Option<Hlc> {
        self.entries.values().max().copied()
    }

    pub fn writers(&self) -> impl Iterator<Item = (&WriterId, &Hlc)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(&self.entries).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        let entries = rmp_serde::from_slice(bytes)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Self { entries })
    }
}
