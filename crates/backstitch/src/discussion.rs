//! Persisted discussion threads.
//!
//! Discussions live inside the document itself, under the
//! `commentThreads` root entry, so they travel with forks, merges, and
//! syncs like any other content. Each thread is a map keyed by a random
//! id, holding a resolved flag, the heads at which it was opened, a list
//! of comments, and the target anchors it points at. Reads are lenient:
//! a malformed thread is skipped with a warning instead of failing the
//! listing, since a single bad entry must not blank out every margin
//! comment in a UI.

use automerge::transaction::Transactable;
use automerge::{AutoCommit, ChangeHash, ObjId, ObjType, ReadDoc, ScalarValue};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::anchor::Anchor;
use crate::doc;
use crate::error::{BackstitchError, Result};

pub(crate) const COMMENTS: &str = "comments";
const ID: &str = "id";
const RESOLVED: &str = "resolved";
const HEADS: &str = "heads";
const TARGET: &str = "target";
const AUTHOR: &str = "author";
const CONTENT_KEY: &str = "content";
const TIMESTAMP: &str = "timestamp";
const START: &str = "start";
const END: &str = "end";

/// One comment inside a discussion thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// Random id of the comment.
    pub id: String,
    /// Application-level author identity, if recorded.
    pub author: Option<String>,
    /// The comment text.
    pub content: String,
    /// Unix-milliseconds creation time; `0` means unknown.
    pub timestamp: i64,
}

/// A discussion thread, optionally anchored to document content.
#[derive(Debug, Clone, PartialEq)]
pub struct Discussion {
    /// Random id of the thread.
    pub id: String,
    /// Heads of the document when the discussion was opened.
    pub heads: Vec<ChangeHash>,
    /// Whether the thread has been resolved.
    pub resolved: bool,
    /// Comments in insertion order.
    pub comments: Vec<Comment>,
    /// Content ranges the discussion points at; empty for a general note.
    pub target: Vec<Anchor>,
}

// ==================== Write Operations ====================

/// Open a new discussion with an initial comment, committed as a single
/// change.
///
/// The recorded heads are the document heads before this write, i.e. the
/// version of the document the discussion is about.
pub fn create_discussion(
    doc: &mut AutoCommit,
    target: &[Anchor],
    author: Option<&str>,
    content: &str,
) -> Result<Discussion> {
    let heads = doc.get_heads();
    let threads = doc::entry(doc, doc::COMMENT_THREADS, ObjType::Map)?;

    let id = Uuid::new_v4().to_string();
    let thread = doc.put_object(&threads, id.as_str(), ObjType::Map)?;
    doc.put(&thread, ID, id.as_str())?;
    doc.put(&thread, RESOLVED, false)?;
    doc::put_heads_list(doc, &thread, HEADS, &heads)?;

    let comments = doc.put_object(&thread, COMMENTS, ObjType::List)?;
    let comment = push_comment(doc, &comments, author, content)?;

    let targets = doc.put_object(&thread, TARGET, ObjType::List)?;
    for (i, anchor) in target.iter().enumerate() {
        let slot = doc.insert_object(&targets, i, ObjType::Map)?;
        doc.put(&slot, START, anchor.start.as_str())?;
        doc.put(&slot, END, anchor.end.as_str())?;
    }

    doc.commit();
    Ok(Discussion {
        id,
        heads,
        resolved: false,
        comments: vec![comment],
        target: target.to_vec(),
    })
}

/// Append a comment to an existing discussion.
///
/// # Errors
///
/// Returns [`BackstitchError::DiscussionNotFound`] if no thread carries
/// the given id.
pub fn add_comment(
    doc: &mut AutoCommit,
    discussion_id: &str,
    author: Option<&str>,
    content: &str,
) -> Result<Comment> {
    let thread = find_thread(doc, discussion_id)?;
    let comments = match doc::object_entry(doc, &thread, COMMENTS) {
        Some((ObjType::List, list)) => list,
        // A thread synced from an older peer may be missing the list.
        _ => doc.put_object(&thread, COMMENTS, ObjType::List)?,
    };
    let comment = push_comment(doc, &comments, author, content)?;
    doc.commit();
    Ok(comment)
}

/// Mark a discussion resolved or unresolved.
///
/// # Errors
///
/// Returns [`BackstitchError::DiscussionNotFound`] if no thread carries
/// the given id.
pub fn set_resolved(doc: &mut AutoCommit, discussion_id: &str, resolved: bool) -> Result<()> {
    let thread = find_thread(doc, discussion_id)?;
    doc.put(&thread, RESOLVED, resolved)?;
    doc.commit();
    Ok(())
}

fn push_comment(
    doc: &mut AutoCommit,
    comments: &ObjId,
    author: Option<&str>,
    content: &str,
) -> Result<Comment> {
    let id = Uuid::new_v4().to_string();
    let timestamp = chrono::Utc::now().timestamp_millis();
    let idx = doc.length(comments);
    let slot = doc.insert_object(comments, idx, ObjType::Map)?;
    doc.put(&slot, ID, id.as_str())?;
    if let Some(author) = author {
        doc.put(&slot, AUTHOR, author)?;
    }
    doc.put(&slot, CONTENT_KEY, content)?;
    doc.put(&slot, TIMESTAMP, ScalarValue::Timestamp(timestamp))?;
    Ok(Comment {
        id,
        author: author.map(str::to_string),
        content: content.to_string(),
        timestamp,
    })
}

fn find_thread(doc: &AutoCommit, id: &str) -> Result<ObjId> {
    let threads = doc::find_entry(doc, doc::COMMENT_THREADS, ObjType::Map)?;
    match doc::object_entry(doc, &threads, id) {
        Some((ObjType::Map, thread)) => Ok(thread),
        _ => Err(BackstitchError::DiscussionNotFound(id.to_string())),
    }
}

// ==================== Read Operations ====================

/// List every discussion thread in the document, keyed by id.
///
/// The engine iterates map keys in a stable order, so the result is
/// deterministic across replicas. A document without a `commentThreads`
/// entry simply has no discussions.
pub fn list_discussions(doc: &AutoCommit) -> Result<IndexMap<String, Discussion>> {
    let threads = match doc::find_entry(doc, doc::COMMENT_THREADS, ObjType::Map) {
        Ok(threads) => threads,
        Err(BackstitchError::MissingEntry(_)) => return Ok(IndexMap::new()),
        Err(e) => return Err(e),
    };

    let mut out = IndexMap::new();
    let keys: Vec<String> = doc.keys(&threads).collect();
    for key in keys {
        match read_discussion(doc, &threads, &key) {
            Some(discussion) => {
                out.insert(key, discussion);
            }
            None => log::warn!("skipping malformed discussion thread '{}'", key),
        }
    }
    Ok(out)
}

/// The unresolved discussions, in listing order.
pub fn unresolved_discussions(doc: &AutoCommit) -> Result<Vec<Discussion>> {
    Ok(list_discussions(doc)?
        .into_values()
        .filter(|d| !d.resolved)
        .collect())
}

fn read_discussion(doc: &AutoCommit, threads: &ObjId, key: &str) -> Option<Discussion> {
    let Some((ObjType::Map, thread)) = doc::object_entry(doc, threads, key) else {
        return None;
    };

    let id = doc::read_string(doc, &thread, ID).unwrap_or_else(|| key.to_string());
    let resolved = doc::read_bool(doc, &thread, RESOLVED).unwrap_or(false);
    let heads = doc::read_heads_list(doc, &thread, HEADS);

    let mut comments = Vec::new();
    if let Some((ObjType::List, list)) = doc::object_entry(doc, &thread, COMMENTS) {
        for i in 0..doc.length(&list) {
            match read_comment(doc, &list, i) {
                Some(comment) => comments.push(comment),
                None => log::warn!("skipping malformed comment {} in thread '{}'", i, key),
            }
        }
    }

    let mut target = Vec::new();
    if let Some((ObjType::List, list)) = doc::object_entry(doc, &thread, TARGET) {
        for i in 0..doc.length(&list) {
            let Some((ObjType::Map, slot)) = doc::object_entry(doc, &list, i) else {
                continue;
            };
            if let (Some(start), Some(end)) = (
                doc::read_string(doc, &slot, START),
                doc::read_string(doc, &slot, END),
            ) {
                target.push(Anchor { start, end });
            }
        }
    }

    Some(Discussion {
        id,
        heads,
        resolved,
        comments,
        target,
    })
}

fn read_comment(doc: &AutoCommit, list: &ObjId, idx: usize) -> Option<Comment> {
    let Some((ObjType::Map, slot)) = doc::object_entry(doc, list, idx) else {
        return None;
    };
    let content = doc::read_string(doc, &slot, CONTENT_KEY)?;
    Some(Comment {
        id: doc::read_string(doc, &slot, ID).unwrap_or_default(),
        author: doc::read_string(doc, &slot, AUTHOR),
        content,
        timestamp: doc::read_i64(doc, &slot, TIMESTAMP).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_list_roundtrip() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        doc::update_content(&mut doc, "some reviewable text").unwrap();
        doc::commit_change(&mut doc, None, None);
        let heads_before = doc.get_heads();

        let anchor = Anchor::from_range(&doc, None, 5..15).unwrap();
        let created =
            create_discussion(&mut doc, &[anchor.clone()], Some("alice"), "looks wrong").unwrap();

        let listed = list_discussions(&doc).unwrap();
        assert_eq!(listed.len(), 1);
        let discussion = &listed[&created.id];
        assert_eq!(discussion.id, created.id);
        assert_eq!(discussion.heads, heads_before);
        assert!(!discussion.resolved);
        assert_eq!(discussion.comments.len(), 1);
        assert_eq!(discussion.comments[0].content, "looks wrong");
        assert_eq!(discussion.comments[0].author.as_deref(), Some("alice"));
        assert_eq!(discussion.target, vec![anchor]);
    }

    #[test]
    fn test_add_comment_appends_in_order() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        let created = create_discussion(&mut doc, &[], Some("alice"), "first").unwrap();
        add_comment(&mut doc, &created.id, Some("bob"), "second").unwrap();
        add_comment(&mut doc, &created.id, None, "third").unwrap();

        let listed = list_discussions(&doc).unwrap();
        let comments = &listed[&created.id].comments;
        assert_eq!(comments.len(), 3);
        assert_eq!(comments[0].content, "first");
        assert_eq!(comments[1].content, "second");
        assert_eq!(comments[2].content, "third");
        assert_eq!(comments[2].author, None);
    }

    #[test]
    fn test_unknown_discussion_id_errors() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        let err = add_comment(&mut doc, "no-such-id", None, "text").unwrap_err();
        assert!(matches!(err, BackstitchError::DiscussionNotFound(_)));

        let err = set_resolved(&mut doc, "no-such-id", true).unwrap_err();
        assert!(matches!(err, BackstitchError::DiscussionNotFound(_)));
    }

    #[test]
    fn test_resolve_and_reopen() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        let created = create_discussion(&mut doc, &[], None, "note").unwrap();

        set_resolved(&mut doc, &created.id, true).unwrap();
        assert!(list_discussions(&doc).unwrap()[&created.id].resolved);
        assert!(unresolved_discussions(&doc).unwrap().is_empty());

        set_resolved(&mut doc, &created.id, false).unwrap();
        assert_eq!(unresolved_discussions(&doc).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_thread_is_skipped() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        let good = create_discussion(&mut doc, &[], None, "kept").unwrap();

        // A scalar where a thread map should be.
        let threads = doc::find_entry(&doc, doc::COMMENT_THREADS, ObjType::Map).unwrap();
        doc.put(&threads, "garbage", 42).unwrap();
        doc.commit();

        let listed = list_discussions(&doc).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.contains_key(&good.id));
    }

    #[test]
    fn test_doc_without_threads_entry_lists_empty() {
        let doc = AutoCommit::new();
        assert!(list_discussions(&doc).unwrap().is_empty());
    }
}
