//! Versioned-document schema over an Automerge document.
//!
//! This module owns the root entries the history layer reads and writes:
//! a `content` text for the document body, a `commentThreads` map for
//! discussions, a `tags` list for named history markers, and a
//! `branchMetadata` map for branch descriptors. Everything else in the
//! document belongs to the embedding application and is left untouched.

use automerge::transaction::{CommitOptions, Transactable};
use automerge::{AutoCommit, ChangeHash, ObjId, ObjType, Prop, ReadDoc, ScalarValue, Value};

use crate::error::{BackstitchError, Result};

/// Name of the root text entry holding the document body.
pub const CONTENT: &str = "content";

/// Name of the root map entry holding discussion threads, keyed by id.
pub const COMMENT_THREADS: &str = "commentThreads";

/// Name of the root list entry holding tag markers.
pub const TAGS: &str = "tags";

/// Name of the root map entry holding branch descriptors and the source pointer.
pub const BRANCH_METADATA: &str = "branchMetadata";

/// Key inside `branchMetadata` listing branches forked off this document.
pub(crate) const BRANCHES: &str = "branches";

/// Key inside `branchMetadata` pointing a branch back at its source document.
pub(crate) const SOURCE: &str = "source";

fn type_name(ty: ObjType) -> &'static str {
    match ty {
        ObjType::Map => "map",
        ObjType::Table => "table",
        ObjType::List => "list",
        ObjType::Text => "text",
    }
}

// ==================== Schema Setup ====================

/// Create a new document carrying the versioned-document schema.
///
/// The returned document has an empty `content` text plus the metadata
/// entries (`commentThreads`, `tags`, `branchMetadata`) already in place,
/// committed as a single initial change.
///
/// # Errors
///
/// Returns an error if the underlying engine rejects a root-entry write.
pub fn init_versioned_doc(actor: Option<automerge::ActorId>) -> Result<AutoCommit> {
    let mut doc = match actor {
        Some(actor) => AutoCommit::new().with_actor(actor),
        None => AutoCommit::new(),
    };
    ensure_versioned(&mut doc)?;
    doc.commit();
    Ok(doc)
}

/// Add any missing schema entries to an existing document.
///
/// Entries that already exist with the right type are left untouched, so
/// this is safe to call on documents that already carry history metadata.
///
/// # Errors
///
/// Returns [`BackstitchError::WrongEntryType`] if a schema key exists but
/// holds a different object type than the layer expects.
pub fn ensure_versioned(doc: &mut AutoCommit) -> Result<()> {
    entry(doc, CONTENT, ObjType::Text)?;
    entry(doc, COMMENT_THREADS, ObjType::Map)?;
    entry(doc, TAGS, ObjType::List)?;
    let metadata = entry(doc, BRANCH_METADATA, ObjType::Map)?;
    if object_entry(doc, &metadata, BRANCHES).is_none() {
        doc.put_object(&metadata, BRANCHES, ObjType::List)?;
    }
    Ok(())
}

/// Look up a root entry, creating it when absent (write path).
pub(crate) fn entry(doc: &mut AutoCommit, key: &'static str, ty: ObjType) -> Result<ObjId> {
    match doc.get(&automerge::ROOT, key)? {
        Some((Value::Object(found), id)) if found == ty => Ok(id),
        Some(_) => Err(BackstitchError::WrongEntryType {
            key,
            expected: type_name(ty),
        }),
        None => Ok(doc.put_object(&automerge::ROOT, key, ty)?),
    }
}

/// Look up a root entry without creating it (read path).
pub(crate) fn find_entry(doc: &AutoCommit, key: &'static str, ty: ObjType) -> Result<ObjId> {
    match doc.get(&automerge::ROOT, key)? {
        Some((Value::Object(found), id)) if found == ty => Ok(id),
        Some(_) => Err(BackstitchError::WrongEntryType {
            key,
            expected: type_name(ty),
        }),
        None => Err(BackstitchError::MissingEntry(key)),
    }
}

// ==================== Content Operations ====================

/// Get the full document body as a string.
///
/// # Errors
///
/// Returns [`BackstitchError::MissingEntry`] if the document has no
/// `content` entry.
pub fn content(doc: &AutoCommit) -> Result<String> {
    let obj = find_entry(doc, CONTENT, ObjType::Text)?;
    Ok(doc.text(&obj)?)
}

/// Get the document body as it was at the given head hashes.
pub fn content_at(doc: &AutoCommit, heads: &[ChangeHash]) -> Result<String> {
    let obj = find_entry(doc, CONTENT, ObjType::Text)?;
    Ok(doc.text_at(&obj, heads)?)
}

/// Set the document body, using minimal splice operations.
///
/// Instead of delete-all + insert-all (which destroys the positional
/// identity concurrent edits and cursors depend on), this computes the
/// common prefix and suffix between current and new content and splices
/// only the middle. Positions are counted in characters, matching the
/// engine's text indexing.
///
/// The edit is left uncommitted so callers can batch several operations
/// into one change; use [`commit_change`] to close it.
pub fn update_content(doc: &mut AutoCommit, new_text: &str) -> Result<()> {
    let obj = entry(doc, CONTENT, ObjType::Text)?;
    let current = doc.text(&obj)?;
    if current == new_text {
        return Ok(());
    }

    let old: Vec<char> = current.chars().collect();
    let new: Vec<char> = new_text.chars().collect();

    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let deleted = old.len() - prefix - suffix;
    let inserted: String = new[prefix..new.len() - suffix].iter().collect();
    doc.splice_text(&obj, prefix, deleted as isize, &inserted)?;
    Ok(())
}

/// Commit pending operations as one change, optionally stamping a commit
/// message and a Unix-seconds timestamp.
///
/// Returns the hash of the new change, or `None` if there was nothing to
/// commit.
pub fn commit_change(
    doc: &mut AutoCommit,
    message: Option<&str>,
    timestamp: Option<i64>,
) -> Option<ChangeHash> {
    let mut options = CommitOptions::default();
    if let Some(message) = message {
        options.set_message(message);
    }
    if let Some(timestamp) = timestamp {
        options.set_time(timestamp);
    }
    doc.commit_with(options)
}

// ==================== Head-Hash Codec ====================

/// Encode head hashes as lowercase hex strings for storage inside the
/// document.
pub fn heads_to_hex(heads: &[ChangeHash]) -> Vec<String> {
    heads.iter().map(|h| h.to_string()).collect()
}

/// Decode hex strings back into head hashes, skipping malformed entries.
pub fn heads_from_hex<S: AsRef<str>>(hex: &[S]) -> Vec<ChangeHash> {
    hex.iter()
        .filter_map(|s| match s.as_ref().parse::<ChangeHash>() {
            Ok(hash) => Some(hash),
            Err(e) => {
                log::warn!("skipping malformed change hash '{}': {}", s.as_ref(), e);
                None
            }
        })
        .collect()
}

// ==================== Scalar Readers ====================

/// Read a string value, returning `None` for absent or non-string entries.
pub(crate) fn read_string(doc: &AutoCommit, obj: &ObjId, prop: impl Into<Prop>) -> Option<String> {
    match doc.get(obj, prop) {
        Ok(Some((Value::Scalar(s), _))) => match s.as_ref() {
            ScalarValue::Str(v) => Some(v.to_string()),
            _ => None,
        },
        _ => None,
    }
}

/// Read an integer-ish value (int, uint, or timestamp), or `None`.
pub(crate) fn read_i64(doc: &AutoCommit, obj: &ObjId, prop: impl Into<Prop>) -> Option<i64> {
    match doc.get(obj, prop) {
        Ok(Some((Value::Scalar(s), _))) => match s.as_ref() {
            ScalarValue::Int(v) => Some(*v),
            ScalarValue::Uint(v) => i64::try_from(*v).ok(),
            ScalarValue::Timestamp(v) => Some(*v),
            _ => None,
        },
        _ => None,
    }
}

/// Read a boolean value, or `None`.
pub(crate) fn read_bool(doc: &AutoCommit, obj: &ObjId, prop: impl Into<Prop>) -> Option<bool> {
    match doc.get(obj, prop) {
        Ok(Some((Value::Scalar(s), _))) => match s.as_ref() {
            ScalarValue::Boolean(v) => Some(*v),
            _ => None,
        },
        _ => None,
    }
}

/// Look up a nested object entry, returning its type and id.
pub(crate) fn object_entry(
    doc: &AutoCommit,
    obj: &ObjId,
    prop: impl Into<Prop>,
) -> Option<(ObjType, ObjId)> {
    match doc.get(obj, prop) {
        Ok(Some((Value::Object(ty), id))) => Some((ty, id)),
        _ => None,
    }
}

// ==================== Head-List Entries ====================

/// Write a list of head hashes (as hex strings) under `key`.
pub(crate) fn put_heads_list(
    doc: &mut AutoCommit,
    obj: &ObjId,
    key: &str,
    heads: &[ChangeHash],
) -> Result<ObjId> {
    let list = doc.put_object(obj, key, ObjType::List)?;
    for (i, head) in heads.iter().enumerate() {
        doc.insert(&list, i, head.to_string())?;
    }
    Ok(list)
}

/// Read a list of head hashes written by [`put_heads_list`].
///
/// Missing entries or malformed hashes are skipped, so a partially
/// synced or hand-edited document degrades to fewer heads instead of an
/// error.
pub(crate) fn read_heads_list(doc: &AutoCommit, obj: &ObjId, key: &str) -> Vec<ChangeHash> {
    let Some((ObjType::List, list)) = object_entry(doc, obj, key) else {
        return Vec::new();
    };
    let mut hex = Vec::new();
    for i in 0..doc.length(&list) {
        if let Some(s) = read_string(doc, &list, i) {
            hex.push(s);
        }
    }
    heads_from_hex(&hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_schema_entries() {
        let doc = init_versioned_doc(None).unwrap();

        assert!(find_entry(&doc, CONTENT, ObjType::Text).is_ok());
        assert!(find_entry(&doc, COMMENT_THREADS, ObjType::Map).is_ok());
        assert!(find_entry(&doc, TAGS, ObjType::List).is_ok());
        let metadata = find_entry(&doc, BRANCH_METADATA, ObjType::Map).unwrap();
        assert!(matches!(
            object_entry(&doc, &metadata, BRANCHES),
            Some((ObjType::List, _))
        ));
    }

    #[test]
    fn test_content_roundtrip() {
        let mut doc = init_versioned_doc(None).unwrap();
        update_content(&mut doc, "Hello world").unwrap();
        commit_change(&mut doc, None, None);

        assert_eq!(content(&doc).unwrap(), "Hello world");
    }

    #[test]
    fn test_update_content_splices_middle_only() {
        let mut doc = init_versioned_doc(None).unwrap();
        update_content(&mut doc, "the dog barks").unwrap();
        commit_change(&mut doc, None, None);
        let before = doc.get_heads();

        update_content(&mut doc, "the cat barks").unwrap();
        commit_change(&mut doc, None, None);
        let after = doc.get_heads();

        // Only the differing middle should have been spliced.
        let obj = find_entry(&doc, CONTENT, ObjType::Text).unwrap();
        assert_eq!(doc.text(&obj).unwrap(), "the cat barks");

        let patches = doc.diff(&before, &after);
        // One splice and one delete covering "dog" -> "cat", nothing else.
        assert!(patches.len() <= 2, "expected a minimal patch set");
    }

    #[test]
    fn test_update_content_is_noop_for_equal_text() {
        let mut doc = init_versioned_doc(None).unwrap();
        update_content(&mut doc, "stable").unwrap();
        commit_change(&mut doc, None, None);
        let heads = doc.get_heads();

        update_content(&mut doc, "stable").unwrap();
        commit_change(&mut doc, None, None);

        assert_eq!(doc.get_heads(), heads);
    }

    #[test]
    fn test_update_content_handles_unicode() {
        let mut doc = init_versioned_doc(None).unwrap();
        update_content(&mut doc, "héllo wörld 👋").unwrap();
        commit_change(&mut doc, None, None);
        update_content(&mut doc, "héllo brave wörld 👋").unwrap();
        commit_change(&mut doc, None, None);

        assert_eq!(content(&doc).unwrap(), "héllo brave wörld 👋");
    }

    #[test]
    fn test_content_at_old_heads() {
        let mut doc = init_versioned_doc(None).unwrap();
        update_content(&mut doc, "one").unwrap();
        commit_change(&mut doc, None, None);
        let old_heads = doc.get_heads();

        update_content(&mut doc, "one two").unwrap();
        commit_change(&mut doc, None, None);

        assert_eq!(content_at(&doc, &old_heads).unwrap(), "one");
        assert_eq!(content(&doc).unwrap(), "one two");
    }

    #[test]
    fn test_commit_change_stamps_message_and_time() {
        let mut doc = init_versioned_doc(None).unwrap();
        update_content(&mut doc, "stamped").unwrap();
        let hash = commit_change(&mut doc, Some("edit"), Some(1_700_000_000)).unwrap();

        let changes = doc.get_changes(&[]);
        let change = changes.iter().find(|c| c.hash() == hash).unwrap();
        assert_eq!(change.message().map(|m| m.to_string()), Some("edit".to_string()));
        assert_eq!(change.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_entry_error() {
        let doc = AutoCommit::new();
        let err = content(&doc).unwrap_err();
        assert!(matches!(err, BackstitchError::MissingEntry(CONTENT)));
    }

    #[test]
    fn test_wrong_entry_type_error() {
        let mut doc = AutoCommit::new();
        doc.put(&automerge::ROOT, CONTENT, "not a text object").unwrap();
        doc.commit();

        let err = content(&doc).unwrap_err();
        assert!(matches!(err, BackstitchError::WrongEntryType { .. }));
    }

    #[test]
    fn test_heads_hex_roundtrip_skips_malformed() {
        let mut doc = init_versioned_doc(None).unwrap();
        update_content(&mut doc, "x").unwrap();
        commit_change(&mut doc, None, None);

        let heads = doc.get_heads();
        let mut hex = heads_to_hex(&heads);
        hex.push("not-a-hash".to_string());

        assert_eq!(heads_from_hex(&hex), heads);
    }
}
