//! Readable text patches and word-boundary consolidation.
//!
//! The engine reports a diff between two views as a stream of raw
//! patches: text splices carrying inserted characters, and deletions
//! carrying only a position and a length. This module converts the
//! content-text portion of that stream into [`TextPatch`]es (recovering
//! the deleted text from the before-view) and consolidates overlapping
//! insert/delete pairs into single replacements, which is what makes a
//! retyped phrase read as one edit instead of two.
//!
//! Positions are character offsets, matching the engine's text indexing,
//! and follow the engine's sequential-application convention: each patch
//! addresses the document with all earlier patches in the stream already
//! applied.

use automerge::{AutoCommit, ChangeHash, ObjId, Patch, PatchAction, Prop};
use serde::{Deserialize, Serialize};

use crate::doc;
use crate::error::Result;

/// An insertion of text at a character position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplicePatch {
    /// Character position of the insertion.
    pub at: usize,
    /// The inserted text.
    pub text: String,
}

impl SplicePatch {
    /// Number of characters inserted.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A deletion of characters, with the removed text recovered from the
/// before-view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePatch {
    /// Character position of the deletion.
    pub at: usize,
    /// Number of characters removed.
    pub len: usize,
    /// The removed text.
    pub removed: String,
}

/// A deletion and an insertion anchored at the same spot, displayed as a
/// single edit. Keeps both raw halves so per-author attribution can still
/// reach the underlying splice and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePatch {
    /// Character position of the replacement.
    pub at: usize,
    /// The insertion half.
    pub splice: SplicePatch,
    /// The deletion half.
    pub del: DeletePatch,
}

impl ReplacePatch {
    /// The text this replacement removed.
    pub fn deleted(&self) -> &str {
        &self.del.removed
    }

    /// The text this replacement inserted.
    pub fn inserted(&self) -> &str {
        &self.splice.text
    }
}

/// One readable edit to the document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TextPatch {
    /// Pure insertion.
    Splice(SplicePatch),
    /// Pure deletion.
    Delete(DeletePatch),
    /// Deletion and insertion consolidated into one edit.
    Replace(ReplacePatch),
}

impl TextPatch {
    /// Character position of the edit.
    pub fn at(&self) -> usize {
        match self {
            TextPatch::Splice(s) => s.at,
            TextPatch::Delete(d) => d.at,
            TextPatch::Replace(r) => r.at,
        }
    }

    /// Exclusive end of the edit in final-document coordinates.
    /// Deletions occupy no final text, so their end equals their start.
    pub fn end(&self) -> usize {
        match self {
            TextPatch::Splice(s) => s.at + s.char_len(),
            TextPatch::Delete(d) => d.at,
            TextPatch::Replace(r) => r.at + r.splice.char_len(),
        }
    }

    /// Net character-count effect of the edit on the document.
    pub fn len_delta(&self) -> isize {
        match self {
            TextPatch::Splice(s) => s.char_len() as isize,
            TextPatch::Delete(d) => -(d.len as isize),
            TextPatch::Replace(r) => r.splice.char_len() as isize - r.del.len as isize,
        }
    }

    /// Characters this edit added.
    pub fn chars_added(&self) -> usize {
        match self {
            TextPatch::Splice(s) => s.char_len(),
            TextPatch::Delete(_) => 0,
            TextPatch::Replace(r) => r.splice.char_len(),
        }
    }

    /// Characters this edit deleted.
    pub fn chars_deleted(&self) -> usize {
        match self {
            TextPatch::Splice(_) => 0,
            TextPatch::Delete(d) => d.len,
            TextPatch::Replace(r) => r.del.len,
        }
    }
}

/// Net character-count effect of a whole patch stream.
pub fn net_delta(patches: &[TextPatch]) -> isize {
    patches.iter().map(TextPatch::len_delta).sum()
}

// ==================== Raw-Patch Conversion ====================

fn is_content_path(path: &[(ObjId, Prop)]) -> bool {
    path.len() == 1
        && matches!(path.first(), Some((_, Prop::Map(key))) if key.as_str() == doc::CONTENT)
}

fn is_comment_list_path(path: &[(ObjId, Prop)]) -> bool {
    matches!(path.first(), Some((_, Prop::Map(key))) if key.as_str() == doc::COMMENT_THREADS)
        && matches!(path.last(), Some((_, Prop::Map(key))) if key.as_str() == crate::discussion::COMMENTS)
}

/// Convert the content-text portion of a raw engine patch stream into
/// [`TextPatch`]es.
///
/// Patches addressing anything other than the `content` entry are
/// skipped; they belong to other parts of the document. Raw deletions
/// carry no removed text, so it is recovered here by walking the view at
/// `before_heads` with a running offset.
///
/// # Errors
///
/// Returns an error if the deleted text has to be recovered but the
/// document has no readable `content` entry.
pub fn content_patches(
    doc: &AutoCommit,
    before_heads: &[ChangeHash],
    patches: &[Patch],
) -> Result<Vec<TextPatch>> {
    let needs_before = patches.iter().any(|p| {
        is_content_path(&p.path) && matches!(p.action, PatchAction::DeleteSeq { .. })
    });
    let before: Vec<char> = if needs_before {
        doc::content_at(doc, before_heads)?.chars().collect()
    } else {
        Vec::new()
    };

    let mut out = Vec::new();
    // Insertions minus deletions seen so far; maps evolving positions
    // back into before-view positions.
    let mut offset: isize = 0;
    for patch in patches {
        if !is_content_path(&patch.path) {
            continue;
        }
        match &patch.action {
            PatchAction::SpliceText { index, value, .. } => {
                let text = value.make_string();
                offset += text.chars().count() as isize;
                out.push(TextPatch::Splice(SplicePatch { at: *index, text }));
            }
            PatchAction::DeleteSeq { index, length } => {
                let start = (*index as isize - offset).max(0) as usize;
                let end = (start + *length).min(before.len());
                let removed: String = before
                    .get(start..end)
                    .map(|chars| chars.iter().collect())
                    .unwrap_or_default();
                if removed.chars().count() != *length {
                    log::warn!(
                        "recovered {} of {} deleted characters at {}",
                        removed.chars().count(),
                        length,
                        index
                    );
                }
                offset -= *length as isize;
                out.push(TextPatch::Delete(DeletePatch {
                    at: *index,
                    len: *length,
                    removed,
                }));
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Count comments added under the discussion-threads entry in a raw
/// patch stream. Only inserts into a thread's comment list count;
/// thread-map puts, target-anchor writes, and field updates do not.
pub fn comments_added(patches: &[Patch]) -> usize {
    patches
        .iter()
        .filter(|p| is_comment_list_path(&p.path))
        .map(|p| match &p.action {
            PatchAction::Insert { values, .. } => values.len(),
            _ => 0,
        })
        .sum()
}

// ==================== Word-Boundary Overlap ====================

/// Longest word-boundary-aligned common prefix of two strings, in
/// characters.
///
/// Equal strings overlap over their full length. Otherwise the overlap
/// is the raw common prefix cut back to the last space inside it, so a
/// shared `"the "` counts but a shared `"the"` glued to differing words
/// does not.
pub fn overlap_start(a: &str, b: &str) -> usize {
    if a == b {
        return a.chars().count();
    }
    let mut matched = 0;
    let mut boundary = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            break;
        }
        matched += 1;
        if ca == ' ' {
            boundary = matched;
        }
    }
    boundary
}

/// Longest word-boundary-aligned common suffix of two strings, in
/// characters. Mirror of [`overlap_start`].
pub fn overlap_end(a: &str, b: &str) -> usize {
    if a == b {
        return a.chars().count();
    }
    let mut matched = 0;
    let mut boundary = 0;
    for (ca, cb) in a.chars().rev().zip(b.chars().rev()) {
        if ca != cb {
            break;
        }
        matched += 1;
        if ca == ' ' {
            boundary = matched;
        }
    }
    boundary
}

// ==================== Consolidation ====================

/// Consolidate a patch stream for display.
///
/// Pass 1 walks adjacent splice/delete pairs anchored at the same
/// content position — the delete starts exactly where the splice ends —
/// and trims away the word-boundary overlap between inserted and removed
/// text, so a retyped phrase doesn't show its unchanged words as both
/// added and deleted. A fully consumed side is dropped. Pass 2 re-sorts
/// by position and merges pairs that remain anchored together into
/// [`TextPatch::Replace`].
///
/// Consolidating an already consolidated stream returns it unchanged.
pub fn consolidate(patches: Vec<TextPatch>) -> Vec<TextPatch> {
    merge_replacements(trim_overlaps(patches))
}

fn trim_overlaps(patches: Vec<TextPatch>) -> Vec<TextPatch> {
    let mut out = Vec::with_capacity(patches.len());
    let mut i = 0;
    while i < patches.len() {
        if let (TextPatch::Splice(splice), Some(TextPatch::Delete(del))) =
            (&patches[i], patches.get(i + 1))
        {
            if del.at == splice.at + splice.char_len() {
                if let Some((residual_splice, residual_del)) = trim_pair(splice, del) {
                    if let Some(s) = residual_splice {
                        out.push(TextPatch::Splice(s));
                    }
                    if let Some(d) = residual_del {
                        out.push(TextPatch::Delete(d));
                    }
                    i += 2;
                    continue;
                }
            }
        }
        out.push(patches[i].clone());
        i += 1;
    }
    out
}

/// Trim the overlap out of an anchored splice/delete pair. Returns
/// `None` when there is no word-boundary overlap to trim.
fn trim_pair(
    splice: &SplicePatch,
    del: &DeletePatch,
) -> Option<(Option<SplicePatch>, Option<DeletePatch>)> {
    let ins_len = splice.char_len();

    let start = overlap_start(&splice.text, &del.removed);
    if start > 0 {
        // The shared prefix of the old text stays in place: insert less,
        // delete less. The residual delete still starts where the
        // residual insertion ends.
        let text: String = splice.text.chars().skip(start).collect();
        let removed: String = del.removed.chars().skip(start).collect();
        let residual_splice = (!text.is_empty()).then(|| SplicePatch {
            at: splice.at + start,
            text,
        });
        let residual_del = (!removed.is_empty()).then(|| DeletePatch {
            at: del.at,
            len: del.len - start,
            removed,
        });
        return Some((residual_splice, residual_del));
    }

    let end = overlap_end(&splice.text, &del.removed);
    if end > 0 {
        let keep_ins = ins_len - end;
        let keep_del = del.len - end;
        let text: String = splice.text.chars().take(keep_ins).collect();
        let removed: String = del.removed.chars().take(keep_del).collect();
        let residual_splice = (keep_ins > 0).then(|| SplicePatch {
            at: splice.at,
            text,
        });
        let residual_del = (keep_del > 0).then(|| DeletePatch {
            at: splice.at + keep_ins,
            len: keep_del,
            removed,
        });
        return Some((residual_splice, residual_del));
    }

    None
}

fn merge_replacements(mut patches: Vec<TextPatch>) -> Vec<TextPatch> {
    patches.sort_by_key(TextPatch::at);
    let mut out = Vec::with_capacity(patches.len());
    let mut i = 0;
    while i < patches.len() {
        if let (TextPatch::Splice(splice), Some(TextPatch::Delete(del))) =
            (&patches[i], patches.get(i + 1))
        {
            if del.at == splice.at + splice.char_len() {
                out.push(TextPatch::Replace(ReplacePatch {
                    at: splice.at,
                    splice: splice.clone(),
                    del: del.clone(),
                }));
                i += 2;
                continue;
            }
        }
        out.push(patches[i].clone());
        i += 1;
    }
    out
}
