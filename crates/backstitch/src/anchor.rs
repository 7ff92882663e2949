//! Stable content anchors built on engine cursors.
//!
//! A raw character offset goes stale the moment anyone edits earlier in
//! the document. Engine cursors track a character as the text shifts
//! around it, so annotations and discussion targets store an [`Anchor`]:
//! a pair of serialized cursors marking the first and last character of
//! a range. Cursor lookups can fail (malformed strings, content torn out
//! from under a cursor), and every failure here degrades to `None`
//! rather than an error, because a single stale anchor must never take
//! down a whole review pass.

use std::ops::Range;

use automerge::{AutoCommit, ChangeHash, Cursor, ObjId, ObjType, ReadDoc};
use serde::{Deserialize, Serialize};

use crate::doc;

/// A stable range of document content, expressed as serialized cursors.
///
/// `start` addresses the first character of the range and `end` the last
/// (inclusive). A zero-length range — the site of a deletion — stores
/// the same cursor twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Anchor {
    /// Cursor at the first character of the range.
    pub start: String,
    /// Cursor at the last character of the range (inclusive).
    pub end: String,
}

impl Anchor {
    /// Anchor the half-open character range `range` of the content text,
    /// as seen at `heads` (or the current view when `None`).
    ///
    /// Positions past the end of the text are clamped to its last
    /// character. Returns `None` when the text is empty at that view,
    /// since there is nothing to anchor to.
    pub fn from_range(
        doc: &AutoCommit,
        heads: Option<&[ChangeHash]>,
        range: Range<usize>,
    ) -> Option<Self> {
        let obj = doc::find_entry(doc, doc::CONTENT, ObjType::Text).ok()?;
        let text = match heads {
            Some(heads) => doc.text_at(&obj, heads).ok()?,
            None => doc.text(&obj).ok()?,
        };
        let len = text.chars().count();
        if len == 0 {
            return None;
        }

        let start_pos = range.start.min(len - 1);
        let last = if range.end > range.start {
            range.end - 1
        } else {
            range.start
        };
        let end_pos = last.min(len - 1);

        let start = cursor_at(doc, &obj, start_pos, heads)?;
        let end = cursor_at(doc, &obj, end_pos, heads)?;
        Some(Self {
            start: start.to_string(),
            end: end.to_string(),
        })
    }

    /// Resolve the anchor against the current view, as a half-open
    /// character range.
    ///
    /// A cursor whose character was deleted still reports a position: it
    /// drifts to the next surviving character. Liveness is checked by
    /// re-deriving a cursor at the reported position and comparing. If
    /// one endpoint is dead the range shrinks to the surviving part;
    /// `None` means both endpoints are dead (the span itself was
    /// deleted) or a cursor is malformed.
    pub fn resolve(&self, doc: &AutoCommit) -> Option<Range<usize>> {
        let obj = doc::find_entry(doc, doc::CONTENT, ObjType::Text).ok()?;
        let start = endpoint(doc, &obj, &self.start)?;
        let end = endpoint(doc, &obj, &self.end)?;
        if !start.alive && !end.alive {
            return None;
        }
        let from = start.position;
        // A live end is inclusive and points at the last character; a
        // dead one has already drifted past the surviving span.
        let to = if end.alive {
            end.position + 1
        } else {
            end.position
        };
        (from < to).then_some(from..to)
    }

    /// Current position of the anchor's first character.
    pub fn position(&self, doc: &AutoCommit) -> Option<usize> {
        self.resolve(doc).map(|r| r.start)
    }

    /// The content text the anchor currently covers.
    pub fn text(&self, doc: &AutoCommit) -> Option<String> {
        let range = self.resolve(doc)?;
        let content = doc::content(doc).ok()?;
        let chars: Vec<char> = content.chars().collect();
        let end = range.end.min(chars.len());
        chars.get(range.start..end).map(|c| c.iter().collect())
    }

    /// Whether two anchors currently cover intersecting content ranges.
    pub fn overlaps(&self, other: &Anchor, doc: &AutoCommit) -> bool {
        match (self.resolve(doc), other.resolve(doc)) {
            (Some(a), Some(b)) => a.start < b.end && b.start < a.end,
            _ => false,
        }
    }
}

struct Endpoint {
    position: usize,
    alive: bool,
}

/// Resolve one cursor to its current position and whether its character
/// still exists.
fn endpoint(doc: &AutoCommit, obj: &ObjId, cursor: &str) -> Option<Endpoint> {
    let position = position_of(doc, obj, cursor)?;
    let alive = match doc.get_cursor(obj, position, None) {
        Ok(current) => current.to_string() == cursor,
        // Past the end of the text: the character is gone.
        Err(_) => false,
    };
    Some(Endpoint { position, alive })
}

/// Cursor at a character position, or `None` with a warning when the
/// engine refuses the position.
pub(crate) fn cursor_at(
    doc: &AutoCommit,
    obj: &ObjId,
    pos: usize,
    heads: Option<&[ChangeHash]>,
) -> Option<Cursor> {
    match doc.get_cursor(obj, pos, heads) {
        Ok(cursor) => Some(cursor),
        Err(e) => {
            log::warn!("no cursor at position {}: {}", pos, e);
            None
        }
    }
}

/// Current position of a serialized cursor, or `None` when the cursor is
/// malformed or no longer resolvable.
pub(crate) fn position_of(doc: &AutoCommit, obj: &ObjId, cursor: &str) -> Option<usize> {
    let parsed = match Cursor::try_from(cursor) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("malformed cursor '{}': {}", cursor, e);
            return None;
        }
    };
    match doc.get_cursor_position(obj, &parsed, None) {
        Ok(pos) => Some(pos),
        Err(e) => {
            log::debug!("cursor no longer resolvable: {}", e);
            None
        }
    }
}
