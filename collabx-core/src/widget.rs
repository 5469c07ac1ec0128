//! The UI seam: a text widget with a single cursor.
//!
//! Anything that can show text and report a caret can host a session:
//! a terminal line editor, a GUI text box, or the in-memory
//! [`BufferWidget`] used headless and in tests. Cursor positions are `char`
//! offsets.

use crate::diff::char_len;

pub trait TextWidget {
    /// Text currently displayed.
    fn text(&self) -> &str;

    /// Caret position.
    fn cursor(&self) -> usize;

    /// Move the caret without touching the text (selection change).
    fn set_cursor(&mut self, cursor: usize);

    /// Programmatic refresh. Not a user edit.
    fn refresh(&mut self, text: &str, cursor: usize);
}

/// Bring `widget` in line with `text` without disturbing the caret more
/// than necessary.
///
/// Nothing happens when the widget already shows `text`. Otherwise the
/// caret keeps its offset, clamped to the new length. Returns whether the
/// widget was rewritten.
pub fn resync<W: TextWidget + ?Sized>(widget: &mut W, text: &str) -> bool {
    if widget.text() == text {
        return false;
    }
    let cursor = widget.cursor().min(char_len(text));
    widget.refresh(text, cursor);
    true
}

/// A plain in-memory widget.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferWidget {
    text: String,
    cursor: usize,
    refreshes: usize,
}

impl BufferWidget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the user typing: the widget shows `text` with the caret at
    /// `cursor`.
    pub fn type_text(&mut self, text: &str, cursor: usize) {
        self.text = text.to_string();
        self.cursor = cursor.min(char_len(text));
    }

    /// Number of programmatic refreshes so far.
    pub fn refreshes(&self) -> usize {
        self.refreshes
    }
}

impl TextWidget for BufferWidget {
    fn text(&self) -> &str {
        &self.text
    }

    fn cursor(&self) -> usize {
        self.cursor
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(char_len(&self.text));
    }

    fn refresh(&mut self, text: &str, cursor: usize) {
        self.text = text.to_string();
        self.cursor = cursor;
        self.refreshes += 1;
    }
}
