//! Change-log decoding.
//!
//! The engine stores history as opaque change blobs. This module decodes
//! them once into [`ChangeRecord`]s, the plain data the grouping engine
//! and timeline UIs work with. Commit messages double as a metadata
//! carrier: messages that parse as JSON are surfaced as structured
//! metadata (`{"author": ...}` and friends), anything else stays a plain
//! message.

use automerge::{AutoCommit, Change, ChangeHash};

/// A decoded change, one entry of the document's history log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Hash identifying the change.
    pub hash: ChangeHash,
    /// Hex-encoded id of the actor that produced the change.
    pub actor: String,
    /// Unix-seconds timestamp stamped at commit time; `0` means unknown.
    pub timestamp: i64,
    /// Raw commit message, if any.
    pub message: Option<String>,
    /// Structured metadata recovered from a JSON commit message.
    pub metadata: Option<serde_json::Value>,
    /// Number of operations in the change, used as a cheap size estimate.
    pub op_count: usize,
}

impl ChangeRecord {
    /// Decode a single engine change.
    pub fn from_change(change: &Change) -> Self {
        let message = change.message().map(|m| m.to_string());
        let metadata = message.as_deref().and_then(parse_metadata);
        Self {
            hash: change.hash(),
            actor: change.actor_id().to_hex_string(),
            timestamp: change.timestamp(),
            message,
            metadata,
            op_count: change.len(),
        }
    }

    /// The author recorded in the change metadata, if any.
    ///
    /// This is the application-level identity (e.g. a contact url), as
    /// opposed to [`actor`](Self::actor) which identifies a device
    /// replica.
    pub fn author(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("author"))
            .and_then(|v| v.as_str())
    }
}

/// Best-effort parse of a commit message as JSON metadata.
///
/// Returns `None` for messages that are not valid JSON; a plain prose
/// commit message is never an error.
pub fn parse_metadata(message: &str) -> Option<serde_json::Value> {
    serde_json::from_str(message).ok()
}

/// Decode the document's full change log, oldest first.
pub fn decode_changes(doc: &mut AutoCommit) -> Vec<ChangeRecord> {
    doc.get_changes(&[])
        .into_iter()
        .map(ChangeRecord::from_change)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_decode_changes_in_log_order() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        doc::update_content(&mut doc, "one").unwrap();
        doc::commit_change(&mut doc, Some("first"), Some(100));
        doc::update_content(&mut doc, "one two").unwrap();
        doc::commit_change(&mut doc, Some("second"), Some(200));

        let records = decode_changes(&mut doc);
        // Schema init plus the two content edits.
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].message.as_deref(), Some("first"));
        assert_eq!(records[2].message.as_deref(), Some("second"));
        assert_eq!(records[1].timestamp, 100);
        assert_eq!(records[2].timestamp, 200);
        assert!(records[2].op_count > 0);
    }

    #[test]
    fn test_json_message_surfaces_author() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        doc::update_content(&mut doc, "by alice").unwrap();
        doc::commit_change(&mut doc, Some(r#"{"author":"alice@example.com"}"#), None);

        let records = decode_changes(&mut doc);
        let last = records.last().unwrap();
        assert_eq!(last.author(), Some("alice@example.com"));
        // The raw message is preserved alongside the parsed form.
        assert!(last.message.as_deref().unwrap().contains("author"));
    }

    #[test]
    fn test_prose_message_yields_no_metadata() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        doc::update_content(&mut doc, "x").unwrap();
        doc::commit_change(&mut doc, Some("fix typo"), None);

        let records = decode_changes(&mut doc);
        let last = records.last().unwrap();
        assert_eq!(last.metadata, None);
        assert_eq!(last.author(), None);
        assert_eq!(last.message.as_deref(), Some("fix typo"));
    }

    #[test]
    fn test_actor_is_hex_encoded() {
        let actor = automerge::ActorId::random();
        let mut doc = doc::init_versioned_doc(Some(actor.clone())).unwrap();
        doc::update_content(&mut doc, "x").unwrap();
        doc::commit_change(&mut doc, None, None);

        let records = decode_changes(&mut doc);
        assert!(records.iter().all(|r| r.actor == actor.to_hex_string()));
    }
}
