//! Change grouping engine.
//!
//! Segments the document's append-only change log into [`ChangeGroup`]s,
//! the entries a history timeline actually shows. Grouping is a single
//! linear pass: a pluggable [`GroupingPolicy`] decides whether each
//! change folds into the current draft group or starts a new one, and
//! [`Marker`]s (tags, merged branches) force a boundary no matter what
//! the policy says. Each finalized group carries the consolidated
//! content diff from the previous emitted boundary, aggregate stats, and
//! the markdown headings that diff touches.
//!
//! Groups whose diff nets out to nothing are dropped: their span folds
//! into the next emitted group, so the timeline never shows no-op
//! entries.

use std::fmt;

use automerge::{AutoCommit, ChangeHash};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::branch::{self, Marker};
use crate::change::{self, ChangeRecord};
use crate::doc;
use crate::patch::{self, TextPatch};

/// Aggregate effect of a group's diff and comment activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Characters inserted into the content text.
    pub chars_added: usize,
    /// Characters removed from the content text.
    pub chars_deleted: usize,
    /// Comments appended to discussion threads.
    pub comments_added: usize,
}

impl GroupStats {
    /// Whether the group changed nothing a reader would notice.
    pub fn is_zero(&self) -> bool {
        self.chars_added == 0 && self.chars_deleted == 0 && self.comments_added == 0
    }
}

/// A contiguous run of changes presented as one logical edit.
///
/// Immutable once emitted; recomputation rebuilds groups from scratch
/// rather than patching an existing one.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeGroup {
    /// Hash of the group's last change, its boundary point on the
    /// timeline.
    pub id: ChangeHash,
    /// Member changes, oldest first.
    pub changes: Vec<ChangeRecord>,
    /// Distinct actor ids seen in the group, in first-seen order.
    pub actor_ids: Vec<String>,
    /// Distinct declared author urls seen in the group, in first-seen
    /// order.
    pub author_urls: Vec<String>,
    /// Consolidated content diff from the previous emitted boundary to
    /// this one.
    pub diff: Vec<TextPatch>,
    /// Aggregate effect of the diff plus comment activity.
    pub stats: GroupStats,
    /// Markers that end this group.
    pub markers: Vec<Marker>,
    /// Unix-seconds timestamp of the last positively-timestamped member,
    /// `0` when none carries one.
    pub time: i64,
    /// Head-set for viewing the document as of this group.
    pub doc_snapshot_heads: Vec<ChangeHash>,
    /// Markdown headings of the sections the diff touches.
    pub headings: Vec<String>,
}

impl ChangeGroup {
    /// Number of member changes. Always at least one.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the group has no members. Never true for emitted groups.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Output of a grouping pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupingResult {
    /// Emitted groups, oldest first.
    pub change_groups: Vec<ChangeGroup>,
    /// Number of raw changes consumed, counting ones whose groups were
    /// dropped as no-ops.
    pub change_count: usize,
}

// ==================== Policies ====================

/// How the engine decides whether consecutive changes share a group.
///
/// Policies are pure predicates over the draft group and the incoming
/// change; markers split regardless of the policy's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// One group per run of changes from a single actor.
    ByActor,
    /// Runs from a single actor, capped at `param` changes per group.
    ByActorAndCount,
    /// One group per run of changes with the same declared author.
    ByAuthor,
    /// Fixed batches of `param` changes.
    ByCount,
    /// Groups capped at roughly `param` edited characters, estimated
    /// from raw operation counts.
    ByCharCount,
    /// Never split on content; only markers cut the timeline.
    ByTagsOnly,
    /// Split when the gap between consecutive change timestamps exceeds
    /// `param` minutes. Changes without a timestamp always merge.
    ByEditTime,
}

impl GroupingPolicy {
    /// Every policy, in display order.
    pub const ALL: [GroupingPolicy; 7] = [
        GroupingPolicy::ByActor,
        GroupingPolicy::ByActorAndCount,
        GroupingPolicy::ByAuthor,
        GroupingPolicy::ByCount,
        GroupingPolicy::ByCharCount,
        GroupingPolicy::ByTagsOnly,
        GroupingPolicy::ByEditTime,
    ];

    /// Stable name, matching the serialized form.
    pub fn name(self) -> &'static str {
        match self {
            GroupingPolicy::ByActor => "by_actor",
            GroupingPolicy::ByActorAndCount => "by_actor_and_count",
            GroupingPolicy::ByAuthor => "by_author",
            GroupingPolicy::ByCount => "by_count",
            GroupingPolicy::ByCharCount => "by_char_count",
            GroupingPolicy::ByTagsOnly => "by_tags_only",
            GroupingPolicy::ByEditTime => "by_edit_time",
        }
    }

    /// Look a policy up by its stable name.
    pub fn from_name(name: &str) -> Option<GroupingPolicy> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn predicate(self, draft: &GroupDraft, incoming: &ChangeRecord, param: f64) -> bool {
        match self {
            GroupingPolicy::ByActor => draft.sole_actor(&incoming.actor),
            GroupingPolicy::ByActorAndCount => {
                draft.sole_actor(&incoming.actor) && draft.changes.len() < param.max(1.0) as usize
            }
            GroupingPolicy::ByAuthor => draft.sole_author() == incoming.author(),
            GroupingPolicy::ByCount => draft.changes.len() < param.max(1.0) as usize,
            GroupingPolicy::ByCharCount => draft.size_estimate + incoming.op_count <= param as usize,
            GroupingPolicy::ByTagsOnly => true,
            GroupingPolicy::ByEditTime => {
                let prev = draft.changes.last().map(|c| c.timestamp).unwrap_or(0);
                prev <= 0
                    || incoming.timestamp <= 0
                    || (incoming.timestamp - prev) as f64 <= param * 60.0
            }
        }
    }
}

impl fmt::Display for GroupingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A grouping policy together with its numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupingOptions {
    /// The segmentation policy.
    pub policy: GroupingPolicy,
    /// Policy parameter: a batch size, character budget, or gap in
    /// minutes, depending on the policy.
    pub param: f64,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            policy: GroupingPolicy::ByActorAndCount,
            param: 100.0,
        }
    }
}

// ==================== The grouping pass ====================

/// An open group the pass is still folding changes into.
struct GroupDraft {
    changes: Vec<ChangeRecord>,
    actor_ids: IndexSet<String>,
    author_urls: IndexSet<String>,
    time: i64,
    // Summed raw op counts, a cheap stand-in for edited characters
    // until the real diff is computed at finalization.
    size_estimate: usize,
}

impl GroupDraft {
    fn seed(change: ChangeRecord) -> Self {
        let mut draft = GroupDraft {
            changes: Vec::new(),
            actor_ids: IndexSet::new(),
            author_urls: IndexSet::new(),
            time: 0,
            size_estimate: 0,
        };
        draft.fold(change);
        draft
    }

    fn fold(&mut self, change: ChangeRecord) {
        self.actor_ids.insert(change.actor.clone());
        if let Some(author) = change.author() {
            self.author_urls.insert(author.to_string());
        }
        if change.timestamp > 0 {
            self.time = change.timestamp;
        }
        self.size_estimate += change.op_count;
        self.changes.push(change);
    }

    fn sole_actor(&self, actor: &str) -> bool {
        self.actor_ids.len() == 1 && self.actor_ids.contains(actor)
    }

    fn sole_author(&self) -> Option<&str> {
        if self.author_urls.len() == 1 {
            self.author_urls.first().map(String::as_str)
        } else {
            None
        }
    }
}

/// Group an already-decoded change log.
///
/// `changes` must be in log order; `markers` boundaries are matched by
/// their first pinned head. For fixed inputs the output is fully
/// deterministic.
pub fn group_changes(
    doc: &mut AutoCommit,
    changes: &[ChangeRecord],
    options: GroupingOptions,
    markers: &[Marker],
) -> GroupingResult {
    let mut result = GroupingResult {
        change_groups: Vec::new(),
        change_count: changes.len(),
    };
    let mut draft: Option<GroupDraft> = None;

    for change in changes {
        match draft.as_mut() {
            Some(current) if options.policy.predicate(current, change, options.param) => {
                current.fold(change.clone());
            }
            _ => {
                if let Some(done) = draft.take() {
                    push_group(doc, done, Vec::new(), &mut result);
                }
                draft = Some(GroupDraft::seed(change.clone()));
            }
        }

        // Markers always win: a change a marker pins is the last member
        // of its group even when the policy would have kept folding.
        let at_boundary: Vec<Marker> = markers
            .iter()
            .filter(|m| m.is_at(&change.hash))
            .cloned()
            .collect();
        if !at_boundary.is_empty()
            && let Some(done) = draft.take()
        {
            push_group(doc, done, at_boundary, &mut result);
        }
    }
    if let Some(done) = draft.take() {
        push_group(doc, done, Vec::new(), &mut result);
    }
    result
}

/// Decode a document's change log and markers, then group it in one
/// call.
pub fn group_document(doc: &mut AutoCommit, options: GroupingOptions) -> GroupingResult {
    let changes = change::decode_changes(doc);
    let markers = branch::markers_for(doc);
    group_changes(doc, &changes, options, &markers)
}

/// Finalize a draft: diff it against the previous emitted boundary,
/// derive stats, and either emit it or drop it as a no-op.
fn push_group(
    doc: &mut AutoCommit,
    draft: GroupDraft,
    markers: Vec<Marker>,
    out: &mut GroupingResult,
) {
    let Some(last) = draft.changes.last() else {
        return;
    };
    let id = last.hash;

    // Diff from the last *emitted* boundary, so spans of dropped no-op
    // groups fold into the next visible one.
    let from = out
        .change_groups
        .last()
        .map(|g| vec![g.id])
        .unwrap_or_default();
    let to = [id];
    let raw = doc.diff(&from, &to);
    let diff = match patch::content_patches(doc, &from, &raw) {
        Ok(patches) => patch::consolidate(patches),
        Err(err) => {
            log::warn!("diff for group {} failed: {}; emitting empty diff", id, err);
            Vec::new()
        }
    };

    let stats = GroupStats {
        chars_added: diff.iter().map(TextPatch::chars_added).sum(),
        chars_deleted: diff.iter().map(TextPatch::chars_deleted).sum(),
        comments_added: patch::comments_added(&raw),
    };
    if stats.is_zero() {
        if markers.is_empty() {
            log::debug!("dropping no-op group at {}", id);
        } else {
            log::debug!(
                "dropping no-op group at {} carrying {} marker(s)",
                id,
                markers.len()
            );
        }
        return;
    }

    let headings = match doc::content_at(doc, &to) {
        Ok(text) => headings_in_diff(&text, &diff),
        Err(_) => Vec::new(),
    };

    out.change_groups.push(ChangeGroup {
        id,
        actor_ids: draft.actor_ids.into_iter().collect(),
        author_urls: draft.author_urls.into_iter().collect(),
        diff,
        stats,
        markers,
        time: draft.time,
        doc_snapshot_heads: to.to_vec(),
        headings,
        changes: draft.changes,
    });
}

/// Markdown headings of the sections a diff touches, in document order.
///
/// A patch belongs to the section of the nearest `#`-prefixed line at or
/// above it; edits before the first heading report none.
fn headings_in_diff(text: &str, patches: &[TextPatch]) -> Vec<String> {
    if patches.is_empty() {
        return Vec::new();
    }
    let mut headings = IndexSet::new();
    let mut current: Option<String> = None;
    let mut line_start = 0usize;
    for line in text.split('\n') {
        let line_end = line_start + line.chars().count();
        if line.starts_with('#') {
            let title = line.trim_start_matches('#').trim();
            current = (!title.is_empty()).then(|| title.to_string());
        }
        if let Some(heading) = &current
            && patches
                .iter()
                .any(|p| p.at() <= line_end && p.end() >= line_start)
        {
            headings.insert(heading.clone());
        }
        line_start = line_end + 1;
    }
    headings.into_iter().collect()
}
