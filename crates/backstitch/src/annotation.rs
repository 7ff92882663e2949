//! Mapping diffs and discussions onto anchored annotations.
//!
//! A consolidated patch stream carries character positions; a review UI
//! needs highlights that survive further editing. This module turns each
//! patch into an [`Annotation`] anchored in the after-view, and
//! synthesizes highlight annotations for the content unresolved
//! discussions point at. A patch that cannot be anchored (for instance
//! when the whole document was deleted) is skipped with a warning; one
//! unanchorable hunk never fails the pass.

use std::ops::Range;

use automerge::{AutoCommit, ChangeHash};
use serde::{Deserialize, Serialize};

use crate::anchor::Anchor;
use crate::discussion::Discussion;
use crate::patch::TextPatch;

/// A diff hunk or highlight pinned to stable content anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Annotation {
    /// Content that was inserted.
    Added {
        /// Range covering the inserted text.
        anchor: Anchor,
        /// The inserted text.
        added: String,
    },
    /// Content that was removed; the anchor marks the deletion point.
    Deleted {
        /// Point anchor at the deletion site.
        anchor: Anchor,
        /// The removed text.
        deleted: String,
    },
    /// Content that was replaced in place.
    Changed {
        /// Range covering the replacement text.
        anchor: Anchor,
        /// The text before the replacement.
        before: String,
        /// The text after the replacement.
        after: String,
    },
    /// Content an unresolved discussion points at.
    Highlighted {
        /// The discussion's target range.
        anchor: Anchor,
        /// The text currently under the anchor.
        value: String,
    },
}

impl Annotation {
    /// The anchor the annotation is pinned to.
    pub fn anchor(&self) -> &Anchor {
        match self {
            Annotation::Added { anchor, .. }
            | Annotation::Deleted { anchor, .. }
            | Annotation::Changed { anchor, .. }
            | Annotation::Highlighted { anchor, .. } => anchor,
        }
    }

    /// Whether this is a discussion highlight rather than a diff hunk.
    pub fn is_highlight(&self) -> bool {
        matches!(self, Annotation::Highlighted { .. })
    }
}

fn anchored(doc: &AutoCommit, heads: &[ChangeHash], range: Range<usize>) -> Option<Anchor> {
    let anchor = Anchor::from_range(doc, Some(heads), range.clone());
    if anchor.is_none() {
        log::warn!(
            "skipping annotation at {}..{}: position not anchorable",
            range.start,
            range.end
        );
    }
    anchor
}

/// Map consolidated text patches onto annotations anchored at
/// `after_heads`.
///
/// For an ascending patch stream the sequential-application positions
/// equal final-document positions, so anchors are resolved against the
/// after-view directly. An unconsolidated splice/delete pair anchored at
/// the same spot maps to a single [`Annotation::Changed`], matching what
/// [`consolidate`](crate::patch::consolidate) would have produced.
pub fn annotate(
    doc: &AutoCommit,
    after_heads: &[ChangeHash],
    patches: &[TextPatch],
) -> Vec<Annotation> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < patches.len() {
        match &patches[i] {
            TextPatch::Replace(r) => {
                let after_len = r.splice.char_len();
                if let Some(anchor) = anchored(doc, after_heads, r.at..r.at + after_len) {
                    out.push(Annotation::Changed {
                        anchor,
                        before: r.deleted().to_string(),
                        after: r.inserted().to_string(),
                    });
                }
            }
            TextPatch::Splice(s) => {
                let len = s.char_len();
                if let Some(TextPatch::Delete(d)) = patches.get(i + 1)
                    && d.at == s.at + len
                {
                    if let Some(anchor) = anchored(doc, after_heads, s.at..s.at + len) {
                        out.push(Annotation::Changed {
                            anchor,
                            before: d.removed.clone(),
                            after: s.text.clone(),
                        });
                    }
                    i += 2;
                    continue;
                }
                if let Some(anchor) = anchored(doc, after_heads, s.at..s.at + len) {
                    out.push(Annotation::Added {
                        anchor,
                        added: s.text.clone(),
                    });
                }
            }
            TextPatch::Delete(d) => {
                if let Some(anchor) = anchored(doc, after_heads, d.at..d.at) {
                    out.push(Annotation::Deleted {
                        anchor,
                        deleted: d.removed.clone(),
                    });
                }
            }
        }
        i += 1;
    }
    out
}

/// Synthesize highlight annotations for the targets of unresolved
/// discussions. Resolved discussions and anchors that no longer resolve
/// are skipped.
pub fn highlights_for(doc: &AutoCommit, discussions: &[Discussion]) -> Vec<Annotation> {
    let mut out = Vec::new();
    for discussion in discussions.iter().filter(|d| !d.resolved) {
        for anchor in &discussion.target {
            let Some(value) = anchor.text(doc) else {
                log::debug!("discussion '{}' has an unresolvable target", discussion.id);
                continue;
            };
            out.push(Annotation::Highlighted {
                anchor: anchor.clone(),
                value,
            });
        }
    }
    out
}
