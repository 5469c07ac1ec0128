//! The shared document: one Yrs `Doc` per client process.
//!
//! This is the only place that talks to the merge capability. Everything
//! above it deals in `char` offsets, [`TextEdit`]s and opaque update bytes.
//!
//! Layout of the underlying `Doc`:
//! ```text
//! Doc
//! ├── "content"        Text   main document text
//! ├── "zones"          Map    zone id → JSON ZoneEntry
//! ├── "zone:<id>"      Text   text of one zone
//! └── "zone:<id>"      Text   ...
//! ```
//!
//! Every mutation is opened with an explicit [`EditOrigin`], and the same
//! origin travels with the resulting [`ChangeEvent`].

use std::fmt;

use yrs::updates::decoder::Decode;
use yrs::{
    Doc, GetString, Map, OffsetKind, Options, Origin, ReadTxn, StateVector, Text, Transact,
    Transaction, TransactionMut, Update, WriteTxn,
};

use crate::diff::{char_to_byte, TextEdit};
use crate::error::DocumentError;
use crate::zones::{ZoneId, ZONES_MAP};

/// Root text holding the main document.
pub const MAIN_TEXT: &str = "content";

const ZONE_TEXT_PREFIX: &str = "zone:";

/// Who caused a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOrigin {
    /// This process's own UI
    Local,
    /// A peer, or anything else applied from outside
    Remote,
}

impl EditOrigin {
    fn tag(self) -> &'static str {
        match self {
            EditOrigin::Local => "collabx/local",
            EditOrigin::Remote => "collabx/remote",
        }
    }
}

impl From<EditOrigin> for Origin {
    fn from(origin: EditOrigin) -> Self {
        Origin::from(origin.tag())
    }
}

/// Which text of the document an edit or a widget refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextTarget {
    Main,
    Zone(ZoneId),
}

impl TextTarget {
    /// Name of the root text backing this target.
    pub fn root_name(&self) -> String {
        match self {
            TextTarget::Main => MAIN_TEXT.to_string(),
            TextTarget::Zone(id) => format!("{ZONE_TEXT_PREFIX}{id}"),
        }
    }
}

impl fmt::Display for TextTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextTarget::Main => write!(f, "main text"),
            TextTarget::Zone(id) => write!(f, "zone {id}"),
        }
    }
}

/// Emitted once per committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Origin the transaction was opened with
    pub origin: EditOrigin,
    /// The transaction's changes as a v1 update
    pub update: Vec<u8>,
}

/// Handle returned by [`SharedDocument::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&ChangeEvent) + Send>;

/// A CRDT text document plus its zones.
pub struct SharedDocument {
    id: String,
    doc: Doc,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl SharedDocument {
    /// Create an empty document. `id` names the relay room.
    pub fn new(id: impl Into<String>) -> Self {
        let doc = Doc::with_options(Options {
            offset_kind: OffsetKind::Bytes,
            ..Options::default()
        });
        {
            let mut txn = doc.transact_mut();
            txn.get_or_insert_text(MAIN_TEXT);
            txn.get_or_insert_map(ZONES_MAP);
        }

        Self {
            id: id.into(),
            doc,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// Document identifier (room name on the relay).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replica id used by the merge algorithm.
    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    /// Current text of the main document.
    pub fn main_text(&self) -> String {
        self.text(&TextTarget::Main).unwrap_or_default()
    }

    /// Current text of `target`, or `None` for a zone that is not registered.
    pub fn text(&self, target: &TextTarget) -> Option<String> {
        self.read(|txn| {
            if let TextTarget::Zone(id) = target {
                if !zone_registered(txn, id) {
                    return None;
                }
            }
            txn.get_text(target.root_name().as_str())
                .map(|text| text.get_string(txn))
        })
    }

    /// Whether `id` is currently a registered zone.
    pub fn has_zone(&self, id: &ZoneId) -> bool {
        self.read(|txn| zone_registered(txn, id))
    }

    /// Apply a diff result to one text as a single transaction.
    pub fn edit_text(
        &mut self,
        target: &TextTarget,
        edit: &TextEdit,
        origin: EditOrigin,
    ) -> Result<ChangeEvent, DocumentError> {
        if let TextTarget::Zone(id) = target {
            if !self.has_zone(id) {
                return Err(DocumentError::UnknownTarget(target.clone()));
            }
        }

        let root = target.root_name();
        let ((), event) = self.transact(origin, |txn| {
            let text = txn.get_or_insert_text(root.as_str());
            let current = text.get_string(&*txn);
            let start = char_to_byte(&current, edit.offset);
            let end = char_to_byte(&current, edit.offset + edit.delete);
            if end > start {
                text.remove_range(txn, start as u32, (end - start) as u32);
            }
            if !edit.insert.is_empty() {
                text.insert(txn, start as u32, &edit.insert);
            }
        });
        Ok(event)
    }

    /// Merge an update received from elsewhere.
    ///
    /// Applying the same update twice, or updates in any order, is safe.
    pub fn apply_update(
        &mut self,
        update: &[u8],
        origin: EditOrigin,
    ) -> Result<ChangeEvent, DocumentError> {
        let update =
            Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;

        let update = {
            let mut txn = self.doc.transact_mut_with(origin);
            txn.apply_update(update)
                .map_err(|e| DocumentError::Apply(e.to_string()))?;
            txn.encode_update_v1()
        };

        let event = ChangeEvent { origin, update };
        self.notify(&event);
        Ok(event)
    }

    /// Full state of the document as a single update.
    pub fn encode_state(&self) -> Vec<u8> {
        self.read(|txn| txn.encode_state_as_update_v1(&StateVector::default()))
    }

    /// Register a callback for every committed change.
    pub fn observe<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    /// Drop a callback registered with [`observe`](Self::observe).
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&Transaction<'_>) -> R) -> R {
        let txn = self.doc.transact();
        f(&txn)
    }

    /// Run `f` inside one write transaction tagged with `origin`.
    pub(crate) fn transact<R>(
        &mut self,
        origin: EditOrigin,
        f: impl FnOnce(&mut TransactionMut<'_>) -> R,
    ) -> (R, ChangeEvent) {
        let (result, update) = {
            let mut txn = self.doc.transact_mut_with(origin);
            let result = f(&mut txn);
            (result, txn.encode_update_v1())
        };

        let event = ChangeEvent { origin, update };
        self.notify(&event);
        (result, event)
    }

    fn notify(&mut self, event: &ChangeEvent) {
        for (_, observer) in &mut self.observers {
            observer(event);
        }
    }
}

impl fmt::Debug for SharedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDocument")
            .field("id", &self.id)
            .field("client_id", &self.client_id())
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn zone_registered<T: ReadTxn>(txn: &T, id: &ZoneId) -> bool {
    txn.get_map(ZONES_MAP)
        .is_some_and(|zones| zones.contains_key(txn, id.as_str()))
}
