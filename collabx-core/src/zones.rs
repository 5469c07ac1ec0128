//! Zones: sub-documents forked from a range of the main text.
//!
//! A zone lives in the same shared document as the main text, so it travels
//! over the same connection and merges through the same update stream. The
//! zone id only namespaces its root text (`zone:<id>`) and its entry in the
//! `zones` membership map.
//!
//! Forking moves text: the selected range is copied into the new zone and
//! deleted from the main text inside ONE transaction, so every peer receives
//! both effects as a single operation. A zone is never merged back.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yrs::{GetString, Map, ReadTxn, Text, WriteTxn};

use crate::diff::{char_len, char_to_byte};
use crate::document::{ChangeEvent, EditOrigin, SharedDocument, TextTarget, MAIN_TEXT};
use crate::error::ZoneError;

/// Root map holding zone membership.
pub(crate) const ZONES_MAP: &str = "zones";

/// Identifier of a zone. Freshly generated ids are UUID v4 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ZoneId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ZoneId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata stored (as JSON) in the membership map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEntry {
    /// Root text holding the zone's content
    pub text_root: String,
    /// Char range of the main text the zone was forked from
    pub start: usize,
    pub end: usize,
    /// Replica that created the zone
    pub created_by: u64,
}

/// Ordered view of the zones registered in a [`SharedDocument`].
///
/// Membership itself lives in the document; the registry keeps the last
/// sorted list it saw so it can tell when membership changed.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    known: Vec<ZoneId>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry primed with the zones already present in `doc`.
    pub fn load(doc: &SharedDocument) -> Self {
        Self {
            known: doc.read(|txn| sorted_zone_ids(txn)),
        }
    }

    /// Zone ids sorted by identifier, as of the last [`refresh`](Self::refresh).
    pub fn zone_ids(&self) -> &[ZoneId] {
        &self.known
    }

    pub fn contains(&self, id: &ZoneId) -> bool {
        self.known.binary_search(id).is_ok()
    }

    /// Re-read membership from `doc`.
    ///
    /// Returns the new sorted list only when a zone was added or removed.
    pub fn refresh(&mut self, doc: &SharedDocument) -> Option<Vec<ZoneId>> {
        let current = doc.read(|txn| sorted_zone_ids(txn));
        if current == self.known {
            return None;
        }
        self.known = current.clone();
        Some(current)
    }

    /// Fork `range` (in chars) of the main text into a new zone.
    ///
    /// The range is validated before anything is touched.
    pub fn create_zone(
        &mut self,
        doc: &mut SharedDocument,
        range: Range<usize>,
    ) -> Result<(ZoneId, ChangeEvent), ZoneError> {
        validate_range(&range, char_len(&doc.main_text()))?;

        let id = ZoneId::generate();
        let entry = ZoneEntry {
            text_root: TextTarget::Zone(id.clone()).root_name(),
            start: range.start,
            end: range.end,
            created_by: doc.client_id(),
        };
        let encoded =
            serde_json::to_string(&entry).map_err(|e| ZoneError::Metadata(e.to_string()))?;

        let ((), event) = doc.transact(EditOrigin::Local, |txn| {
            let content = txn.get_or_insert_text(MAIN_TEXT);
            let current = content.get_string(&*txn);
            let start = char_to_byte(&current, range.start);
            let end = char_to_byte(&current, range.end);

            let zone_text = txn.get_or_insert_text(entry.text_root.as_str());
            zone_text.insert(txn, 0, &current[start..end]);

            let zones = txn.get_or_insert_map(ZONES_MAP);
            zones.insert(txn, id.as_str(), encoded);

            content.remove_range(txn, start as u32, (end - start) as u32);
        });

        log::debug!("Forked chars {}..{} into zone {id}", range.start, range.end);
        Ok((id, event))
    }

    /// Unregister a zone and clear its text, as one local transaction.
    pub fn remove_zone(
        &mut self,
        doc: &mut SharedDocument,
        id: &ZoneId,
    ) -> Result<ChangeEvent, ZoneError> {
        if !doc.has_zone(id) {
            return Err(ZoneError::UnknownZone(id.clone()));
        }

        let root = TextTarget::Zone(id.clone()).root_name();
        let ((), event) = doc.transact(EditOrigin::Local, |txn| {
            let zones = txn.get_or_insert_map(ZONES_MAP);
            zones.remove(txn, id.as_str());

            let text = txn.get_or_insert_text(root.as_str());
            let len = text.len(&*txn);
            if len > 0 {
                text.remove_range(txn, 0, len);
            }
        });

        log::debug!("Removed zone {id}");
        Ok(event)
    }

    /// Metadata of a registered zone.
    pub fn zone_entry(&self, doc: &SharedDocument, id: &ZoneId) -> Option<ZoneEntry> {
        doc.read(|txn| {
            let zones = txn.get_map(ZONES_MAP)?;
            let raw = zones.get(txn, id.as_str())?.to_string(txn);
            serde_json::from_str(&raw).ok()
        })
    }
}

fn sorted_zone_ids<T: ReadTxn>(txn: &T) -> Vec<ZoneId> {
    let Some(zones) = txn.get_map(ZONES_MAP) else {
        return Vec::new();
    };
    let mut ids: Vec<ZoneId> = zones.keys(txn).map(ZoneId::from).collect();
    ids.sort();
    ids
}

fn validate_range(range: &Range<usize>, len: usize) -> Result<(), ZoneError> {
    if range.start > range.end {
        return Err(ZoneError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    if range.start == range.end {
        return Err(ZoneError::EmptyRange);
    }
    if range.end > len {
        return Err(ZoneError::OutOfBounds {
            end: range.end,
            len,
        });
    }
    Ok(())
}
