//! Snapshot diffing for single-cursor text widgets.
//!
//! Turns a "before" and "after" snapshot of a widget into one contiguous
//! edit: keep the common prefix, keep the common suffix, and replace what is
//! left in between.
//!
//! ```text
//!   old:  H e l l o ␣ w o r l d
//!         └─prefix─┘ ▲     └suffix┘
//!                    │ delete / insert here
//!   new:  H e l l o ␣ b i g ␣ w o r l d
//! ```
//!
//! Two separate changes (say, typing at both ends of the text between two
//! snapshots) collapse into one larger region. That is fine for a widget
//! that reports every keystroke, and it keeps the emitted operations small.
//!
//! All offsets and lengths are counted in `char`s.

/// A single contiguous replacement: delete `delete` chars at `offset`, then
/// insert `insert` at the same offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Length of the untouched prefix.
    pub offset: usize,
    /// Number of chars removed after the prefix.
    pub delete: usize,
    /// Text inserted at `offset` once the deletion is done.
    pub insert: String,
}

impl TextEdit {
    /// Number of chars in the inserted slice.
    pub fn insert_len(&self) -> usize {
        self.insert.chars().count()
    }

    /// True when applying the edit would change nothing.
    pub fn is_noop(&self) -> bool {
        self.delete == 0 && self.insert.is_empty()
    }

    /// Apply the edit to `text`, returning the new text.
    ///
    /// Offsets past the end of `text` are clamped to its length.
    pub fn apply(&self, text: &str) -> String {
        let start = char_to_byte(text, self.offset);
        let end = char_to_byte(text, self.offset + self.delete);
        let mut out = String::with_capacity(text.len() - (end - start) + self.insert.len());
        out.push_str(&text[..start]);
        out.push_str(&self.insert);
        out.push_str(&text[end..]);
        out
    }

    /// Move this edit past `concurrent`, an edit made to the same base text.
    ///
    /// The result applies to `concurrent.apply(base)`. Edits on either side
    /// of `concurrent` keep their meaning; an insertion at the same offset
    /// goes first. Where both edits delete the same chars, only the part of
    /// this deletion that lies before `concurrent`'s region survives when
    /// this edit starts first, and only the part after it otherwise.
    pub fn rebase(&self, concurrent: &TextEdit) -> TextEdit {
        let start = self.offset;
        let end = self.offset + self.delete;
        let other_start = concurrent.offset;
        let other_end = concurrent.offset + concurrent.delete;
        let inserted = concurrent.insert_len();

        if end <= other_start {
            return self.clone();
        }
        if start >= other_end {
            return TextEdit {
                offset: start + inserted - concurrent.delete,
                delete: self.delete,
                insert: self.insert.clone(),
            };
        }

        // overlapping deletions
        if start < other_start {
            TextEdit {
                offset: start,
                delete: other_start - start,
                insert: self.insert.clone(),
            }
        } else {
            TextEdit {
                offset: other_start + inserted,
                delete: end.saturating_sub(other_end),
                insert: self.insert.clone(),
            }
        }
    }
}

/// Compute the edit that turns `old` into `new`.
///
/// Returns `None` when both texts are equal.
pub fn diff(old: &str, new: &str) -> Option<TextEdit> {
    if old == new {
        return None;
    }

    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let prefix = old_chars
        .iter()
        .zip(&new_chars)
        .take_while(|(a, b)| a == b)
        .count();

    // The suffix scan must not eat into the prefix of either side,
    // e.g. "aaa" -> "aa" is one deletion at offset 2, not a negative span.
    let max_suffix = old_chars.len().min(new_chars.len()) - prefix;
    let suffix = old_chars
        .iter()
        .rev()
        .zip(new_chars.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let delete = old_chars.len() - prefix - suffix;
    let insert: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();

    Some(TextEdit {
        offset: prefix,
        delete,
        insert,
    })
}

/// Byte index of the `chars`-th char of `text`, or `text.len()` past the end.
pub fn char_to_byte(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(index, _)| index)
}

/// Number of chars in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
