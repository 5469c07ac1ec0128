//! Document session: the wiring between widgets, document and transport.
//!
//! ```text
//!  widget input ──► diff ──► SharedDocument (Local) ──► Frame::update ──► Transport
//!                                  ▲
//!  Transport bytes ──► Frame ──────┘ (Remote)  ──► resync widgets, refresh zones
//! ```
//!
//! Only `Local` changes are ever sent. Remote changes are merged and
//! rendered, never echoed back.
//!
//! Every mutation of [`SharedDocument`] returns the [`ChangeEvent`] of its
//! transaction; the session reacts to that returned event rather than to a
//! registered observer, since it is the only writer of its document.
//!
//! Widget input is never read while a remote update is being applied:
//! [`receive`](DocumentSession::receive) and the input handlers all take
//! `&mut self`, and a widget refreshed by a remote change ends up showing
//! the document text, so diffing it afterwards yields nothing.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::diff::diff;
use crate::document::{ChangeEvent, EditOrigin, SharedDocument, TextTarget};
use crate::error::{DocumentError, ZoneError};
use crate::frame::Frame;
use crate::transport::Transport;
use crate::widget::{resync, TextWidget};
use crate::zones::{ZoneEntry, ZoneId, ZoneRegistry};

type ZoneListener = Box<dyn FnMut(&[ZoneId]) + Send>;

/// Owns one document and drives it from widget input and transport traffic.
///
/// The session is the only writer of its document and the only caller of
/// its transport's `send`. It is meant to live on a single task; nothing in
/// here blocks or suspends.
pub struct DocumentSession<T, W> {
    doc: SharedDocument,
    transport: T,
    zones: ZoneRegistry,
    widgets: BTreeMap<TextTarget, W>,
    zone_listener: Option<ZoneListener>,
}

impl<T: Transport, W: TextWidget> DocumentSession<T, W> {
    pub fn new(doc: SharedDocument, transport: T, main_widget: W) -> Self {
        let zones = ZoneRegistry::load(&doc);
        let mut widgets = BTreeMap::new();
        widgets.insert(TextTarget::Main, main_widget);

        let mut session = Self {
            doc,
            transport,
            zones,
            widgets,
            zone_listener: None,
        };
        session.resync_widgets();
        session
    }

    pub fn document(&self) -> &SharedDocument {
        &self.doc
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Registered zones, sorted by id.
    pub fn zone_ids(&self) -> &[ZoneId] {
        self.zones.zone_ids()
    }

    pub fn zone_entry(&self, id: &ZoneId) -> Option<ZoneEntry> {
        self.zones.zone_entry(&self.doc, id)
    }

    pub fn widget(&self, target: &TextTarget) -> Option<&W> {
        self.widgets.get(target)
    }

    pub fn widget_mut(&mut self, target: &TextTarget) -> Option<&mut W> {
        self.widgets.get_mut(target)
    }

    /// Bind a widget to a text. The widget is rendered right away.
    pub fn attach_widget(&mut self, target: TextTarget, widget: W) -> Result<(), DocumentError> {
        let Some(text) = self.doc.text(&target) else {
            return Err(DocumentError::UnknownTarget(target));
        };
        let mut widget = widget;
        resync(&mut widget, &text);
        self.widgets.insert(target, widget);
        Ok(())
    }

    pub fn detach_widget(&mut self, target: &TextTarget) -> Option<W> {
        self.widgets.remove(target)
    }

    /// Called with the sorted zone ids whenever membership changes.
    pub fn on_zones_changed<F>(&mut self, listener: F)
    where
        F: FnMut(&[ZoneId]) + Send + 'static,
    {
        self.zone_listener = Some(Box::new(listener));
    }

    /// The widget bound to `target` reports user input.
    ///
    /// Returns `Ok(true)` when an operation was produced.
    pub fn handle_input(&mut self, target: &TextTarget) -> Result<bool, DocumentError> {
        let Some(widget) = self.widgets.get(target) else {
            return Err(DocumentError::UnknownTarget(target.clone()));
        };
        let Some(current) = self.doc.text(target) else {
            return Err(DocumentError::UnknownTarget(target.clone()));
        };
        let Some(edit) = diff(&current, widget.text()) else {
            return Ok(false);
        };

        let event = self.doc.edit_text(target, &edit, EditOrigin::Local)?;
        self.handle_change(event);
        Ok(true)
    }

    /// The user turned `base` into `typed` while the widget bound to
    /// `target` lagged behind the document.
    ///
    /// The user's edit is rebased over whatever changed between `base` and
    /// the current text, applied as one local transaction, and the widget
    /// is re-rendered with the caret after the edit. Returns `Ok(true)` when
    /// an operation was produced.
    pub fn handle_stale_input(
        &mut self,
        target: &TextTarget,
        base: &str,
        typed: &str,
    ) -> Result<bool, DocumentError> {
        if !self.widgets.contains_key(target) {
            return Err(DocumentError::UnknownTarget(target.clone()));
        }
        let Some(current) = self.doc.text(target) else {
            return Err(DocumentError::UnknownTarget(target.clone()));
        };
        let Some(local) = diff(base, typed) else {
            return Ok(false);
        };
        let edit = match diff(base, &current) {
            Some(concurrent) => local.rebase(&concurrent),
            None => local,
        };
        if edit.is_noop() {
            return Ok(false);
        }

        if let Some(widget) = self.widgets.get_mut(target) {
            widget.set_cursor(edit.offset + edit.insert_len());
        }
        let event = self.doc.edit_text(target, &edit, EditOrigin::Local)?;
        self.handle_change(event);
        Ok(true)
    }

    /// Caret moved without an edit.
    pub fn handle_select(&mut self, target: &TextTarget, cursor: usize) -> bool {
        match self.widgets.get_mut(target) {
            Some(widget) => {
                widget.set_cursor(cursor);
                true
            }
            None => false,
        }
    }

    /// Merge one frame received from the transport.
    ///
    /// Malformed frames and updates are logged and dropped; the session
    /// keeps going. Returns whether anything was applied.
    pub fn receive(&mut self, bytes: &[u8]) -> bool {
        let payload = match Frame::decode(bytes).and_then(Frame::into_payload) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Dropping undecodable frame ({} bytes): {e}", bytes.len());
                return false;
            }
        };

        match self.doc.apply_update(&payload, EditOrigin::Remote) {
            Ok(event) => {
                self.handle_change(event);
                true
            }
            Err(e) => {
                log::warn!("Dropping remote update for {}: {e}", self.doc.id());
                false
            }
        }
    }

    /// A connection just opened: send the whole state.
    ///
    /// Seeds peers that have never seen this document and covers every
    /// local edit that was dropped while offline.
    pub fn on_connected(&mut self) {
        let frame = Frame::snapshot(self.doc.encode_state());
        log::info!(
            "Sending snapshot of {} ({} bytes)",
            self.doc.id(),
            frame.payload.len()
        );
        self.send_frame(&frame);
    }

    /// Fork `range` (chars of the main text) into a new zone.
    pub fn create_zone(&mut self, range: Range<usize>) -> Result<ZoneId, ZoneError> {
        let (id, event) = self.zones.create_zone(&mut self.doc, range)?;
        self.handle_change(event);
        Ok(id)
    }

    pub fn remove_zone(&mut self, id: &ZoneId) -> Result<(), ZoneError> {
        let event = self.zones.remove_zone(&mut self.doc, id)?;
        self.handle_change(event);
        Ok(())
    }

    fn handle_change(&mut self, event: ChangeEvent) {
        if event.origin == EditOrigin::Local {
            if self.transport.is_connected() {
                self.send_frame(&Frame::update(event.update));
            } else {
                log::debug!(
                    "Offline, not sending {} byte update; the next snapshot carries it",
                    event.update.len()
                );
            }
        }
        self.refresh_zones();
        self.resync_widgets();
    }

    fn refresh_zones(&mut self) {
        let Some(ids) = self.zones.refresh(&self.doc) else {
            return;
        };
        self.widgets.retain(|target, _| match target {
            TextTarget::Main => true,
            TextTarget::Zone(id) => ids.binary_search(id).is_ok(),
        });
        if let Some(listener) = self.zone_listener.as_mut() {
            listener(&ids);
        }
    }

    fn resync_widgets(&mut self) {
        for (target, widget) in &mut self.widgets {
            if let Some(text) = self.doc.text(target) {
                resync(widget, &text);
            }
        }
    }

    fn send_frame(&self, frame: &Frame) {
        match frame.encode() {
            Ok(bytes) => self.transport.send(bytes),
            Err(e) => log::error!("Failed to encode frame: {e}"),
        }
    }
}
