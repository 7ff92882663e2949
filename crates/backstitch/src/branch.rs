//! Branch and tag metadata.
//!
//! Branches are separate engine documents forked off a source document.
//! The bookkeeping lives inside the documents themselves: the source
//! keeps a descriptor list under `branchMetadata.branches`, and each
//! branch document keeps a `branchMetadata.source` pointer naming its
//! source and the source heads it has seen. Tags are lighter: a name
//! pinned to a head-set, stored in the `tags` list. Both tags and merged
//! branches surface as [`Marker`]s, which the grouping engine treats as
//! hard timeline boundaries.
//!
//! Creating a branch is deliberately not atomic — descriptor and pointer
//! live in two different documents — so the write order in
//! [`create_branch`] is load-bearing and spelled out step by step there.

use std::fmt;
use std::str::FromStr;

use automerge::transaction::Transactable;
use automerge::{AutoCommit, ChangeHash, ObjId, ObjType, ReadDoc, ScalarValue};
use uuid::Uuid;

use crate::doc;
use crate::error::Result;

const NAME: &str = "name";
const HEADS: &str = "heads";
const URL: &str = "url";
const CREATED_AT: &str = "createdAt";
const CREATED_BY: &str = "createdBy";
const BRANCH_HEADS: &str = "branchHeads";
const MERGE_METADATA: &str = "mergeMetadata";
const MERGED_AT: &str = "mergedAt";
const MERGED_BY: &str = "mergedBy";
const MERGE_HEADS: &str = "mergeHeads";

/// Identifier for a branch document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocId(Uuid);

impl DocId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A named pin on a head-set of the document's history.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Display name of the tag.
    pub name: String,
    /// The heads the tag pins.
    pub heads: Vec<ChangeHash>,
    /// Unix-milliseconds creation time; `0` means unknown.
    pub created_at: i64,
    /// Who created the tag, if recorded.
    pub created_by: Option<String>,
}

/// Merge state stamped onto a branch descriptor when the branch lands.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeMetadata {
    /// Unix-milliseconds merge time; `0` means unknown.
    pub merged_at: i64,
    /// The branch's heads at the moment it was merged.
    pub merge_heads: Vec<ChangeHash>,
    /// Who merged the branch, if recorded.
    pub merged_by: Option<String>,
}

/// A branch descriptor as stored in the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Display name of the branch.
    pub name: String,
    /// Identifier of the branch document.
    pub url: String,
    /// Unix-milliseconds creation time; `0` means unknown.
    pub created_at: i64,
    /// Who created the branch, if recorded.
    pub created_by: Option<String>,
    /// The source heads the branch was forked at.
    pub branch_heads: Vec<ChangeHash>,
    /// Present once the branch has been merged back.
    pub merge_metadata: Option<MergeMetadata>,
}

/// A branch document's pointer back at its source.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchSource {
    /// Identifier of the source document.
    pub url: String,
    /// The source heads the branch has seen.
    pub branch_heads: Vec<ChangeHash>,
}

/// A freshly created branch: its id, its document, and the descriptor
/// recorded in the source.
#[derive(Debug)]
pub struct NewBranch {
    /// Identifier of the branch document.
    pub id: DocId,
    /// The branch document itself.
    pub doc: AutoCommit,
    /// The descriptor written into the source document.
    pub descriptor: Branch,
}

/// A hard boundary on the grouped timeline: a tag or a merged branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    /// A named tag.
    Tag(Tag),
    /// A branch that was merged back into this document.
    MergedBranch {
        /// Display name of the merged branch.
        name: String,
        /// The branch's heads at merge time.
        merge_heads: Vec<ChangeHash>,
    },
}

impl Marker {
    /// The head-set the marker pins.
    pub fn heads(&self) -> &[ChangeHash] {
        match self {
            Marker::Tag(tag) => &tag.heads,
            Marker::MergedBranch { merge_heads, .. } => merge_heads,
        }
    }

    /// Display label of the marker.
    pub fn label(&self) -> &str {
        match self {
            Marker::Tag(tag) => &tag.name,
            Marker::MergedBranch { name, .. } => name,
        }
    }

    /// Whether the marker sits at the given change. Only the first
    /// pinned head is considered; multi-head pins land on the timeline
    /// at their first hash.
    pub fn is_at(&self, hash: &ChangeHash) -> bool {
        self.heads().first() == Some(hash)
    }
}

// ==================== Tags ====================

/// Pin the document's current heads under a name, committed as one
/// change.
pub fn create_tag(doc: &mut AutoCommit, name: &str, created_by: Option<&str>) -> Result<Tag> {
    let heads = doc.get_heads();
    let created_at = chrono::Utc::now().timestamp_millis();

    let tags = doc::entry(doc, doc::TAGS, ObjType::List)?;
    let idx = doc.length(&tags);
    let slot = doc.insert_object(&tags, idx, ObjType::Map)?;
    doc.put(&slot, NAME, name)?;
    doc.put(&slot, CREATED_AT, ScalarValue::Timestamp(created_at))?;
    if let Some(by) = created_by {
        doc.put(&slot, CREATED_BY, by)?;
    }
    doc::put_heads_list(doc, &slot, HEADS, &heads)?;
    doc.commit();

    Ok(Tag {
        name: name.to_string(),
        heads,
        created_at,
        created_by: created_by.map(str::to_string),
    })
}

/// Remove the first tag with the given name. Returns whether a tag was
/// removed.
pub fn delete_tag(doc: &mut AutoCommit, name: &str) -> Result<bool> {
    let Ok(tags) = doc::find_entry(doc, doc::TAGS, ObjType::List) else {
        return Ok(false);
    };
    for i in 0..doc.length(&tags) {
        if let Some((ObjType::Map, slot)) = doc::object_entry(doc, &tags, i)
            && doc::read_string(doc, &slot, NAME).as_deref() == Some(name)
        {
            doc.delete(&tags, i)?;
            doc.commit();
            return Ok(true);
        }
    }
    Ok(false)
}

/// List the document's tags in creation order, skipping malformed
/// entries.
pub fn list_tags(doc: &AutoCommit) -> Vec<Tag> {
    let Ok(tags) = doc::find_entry(doc, doc::TAGS, ObjType::List) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for i in 0..doc.length(&tags) {
        let Some((ObjType::Map, slot)) = doc::object_entry(doc, &tags, i) else {
            log::warn!("skipping malformed tag entry {}", i);
            continue;
        };
        let Some(name) = doc::read_string(doc, &slot, NAME) else {
            log::warn!("skipping tag entry {} without a name", i);
            continue;
        };
        out.push(Tag {
            name,
            heads: doc::read_heads_list(doc, &slot, HEADS),
            created_at: doc::read_i64(doc, &slot, CREATED_AT).unwrap_or(0),
            created_by: doc::read_string(doc, &slot, CREATED_BY),
        });
    }
    out
}

// ==================== Branches ====================

/// Fork a branch off a source document.
///
/// The dance spans two documents and its order is load-bearing:
///
/// 1. fork the source (optionally at a historical head-set),
/// 2. write the branch descriptor into the source and commit it,
/// 3. merge the source into the fork, so the fork carries its own
///    descriptor,
/// 4. stamp the fork's source pointer with the source's post-merge
///    heads — any earlier and the pointer would record a pre-descriptor
///    head-set, leaving a fresh branch looking stale.
///
/// A fork at historical heads skips step 3: the descriptor change
/// descends from the source's current heads, so merging it would pull
/// every later change into the fork and destroy the historical view.
/// Step 4 then stamps the fork heads instead — descriptor and pointer
/// agree on the fork point, and the branch starts out stale until
/// [`rebase_branch`] catches it up (which also delivers the descriptor).
pub fn create_branch(
    source: &mut AutoCommit,
    source_url: &str,
    name: &str,
    created_by: Option<&str>,
    at: Option<&[ChangeHash]>,
) -> Result<NewBranch> {
    // Step 1: fork.
    let mut branch_doc = match at {
        Some(heads) => source.fork_at(heads)?,
        None => source.fork(),
    };
    let fork_heads = match at {
        Some(heads) => heads.to_vec(),
        None => source.get_heads(),
    };

    let id = DocId::new();
    let url = id.to_string();
    let created_at = chrono::Utc::now().timestamp_millis();

    // Step 2: record the descriptor in the source.
    let metadata = doc::entry(source, doc::BRANCH_METADATA, ObjType::Map)?;
    let branches = branches_list(source, &metadata)?;
    let idx = source.length(&branches);
    let slot = source.insert_object(&branches, idx, ObjType::Map)?;
    source.put(&slot, URL, url.as_str())?;
    source.put(&slot, NAME, name)?;
    source.put(&slot, CREATED_AT, ScalarValue::Timestamp(created_at))?;
    if let Some(by) = created_by {
        source.put(&slot, CREATED_BY, by)?;
    }
    doc::put_heads_list(source, &slot, BRANCH_HEADS, &fork_heads)?;
    source.commit();

    // Step 3: carry the descriptor into the fork. A historical fork
    // skips this, since the descriptor change descends from the current
    // heads and would bring every later change with it.
    let seen_heads = if at.is_none() {
        branch_doc.merge(source)?;
        source.get_heads()
    } else {
        fork_heads.clone()
    };

    // Step 4: stamp the fork's source pointer.
    let branch_metadata = doc::entry(&mut branch_doc, doc::BRANCH_METADATA, ObjType::Map)?;
    let pointer = branch_doc.put_object(&branch_metadata, doc::SOURCE, ObjType::Map)?;
    branch_doc.put(&pointer, URL, source_url)?;
    doc::put_heads_list(&mut branch_doc, &pointer, BRANCH_HEADS, &seen_heads)?;
    branch_doc.commit();

    let descriptor = Branch {
        name: name.to_string(),
        url,
        created_at,
        created_by: created_by.map(str::to_string),
        branch_heads: fork_heads,
        merge_metadata: None,
    };
    Ok(NewBranch {
        id,
        doc: branch_doc,
        descriptor,
    })
}

/// Merge a branch document back into its source and stamp the merge
/// state onto the branch's descriptor. Returns the source's new heads.
///
/// A missing descriptor is a consistency warning, not an error: the
/// content merge has already happened and losing it would be worse.
pub fn merge_branch(
    source: &mut AutoCommit,
    branch: &mut AutoCommit,
    branch_url: &str,
    merged_by: Option<&str>,
) -> Result<Vec<ChangeHash>> {
    source.merge(branch)?;
    let merge_heads = branch.get_heads();
    let merged_at = chrono::Utc::now().timestamp_millis();

    match find_branch_slot(source, branch_url) {
        Some((list, idx)) => {
            if let Some((ObjType::Map, slot)) = doc::object_entry(source, &list, idx) {
                let merge = source.put_object(&slot, MERGE_METADATA, ObjType::Map)?;
                source.put(&merge, MERGED_AT, ScalarValue::Timestamp(merged_at))?;
                if let Some(by) = merged_by {
                    source.put(&merge, MERGED_BY, by)?;
                }
                doc::put_heads_list(source, &merge, MERGE_HEADS, &merge_heads)?;
            }
        }
        None => log::warn!(
            "merged branch '{}' has no descriptor in the source document",
            branch_url
        ),
    }
    source.commit();
    Ok(source.get_heads())
}

/// Remove a branch descriptor from the source document. Returns whether
/// a descriptor was removed.
pub fn delete_branch(source: &mut AutoCommit, branch_url: &str) -> Result<bool> {
    match find_branch_slot(source, branch_url) {
        Some((list, idx)) => {
            source.delete(&list, idx)?;
            source.commit();
            Ok(true)
        }
        None => {
            log::warn!("no descriptor to delete for branch '{}'", branch_url);
            Ok(false)
        }
    }
}

/// Pull the source's changes into a branch and advance the branch's
/// source pointer to the source's current heads. Returns the branch's
/// new heads.
pub fn rebase_branch(branch: &mut AutoCommit, source: &mut AutoCommit) -> Result<Vec<ChangeHash>> {
    branch.merge(source)?;
    let source_heads = source.get_heads();
    let metadata = doc::entry(branch, doc::BRANCH_METADATA, ObjType::Map)?;
    match doc::object_entry(branch, &metadata, doc::SOURCE) {
        Some((ObjType::Map, pointer)) => {
            doc::put_heads_list(branch, &pointer, BRANCH_HEADS, &source_heads)?;
        }
        _ => log::warn!("branch has no source pointer to advance"),
    }
    branch.commit();
    Ok(branch.get_heads())
}

/// Read a branch document's pointer back at its source, if present.
pub fn branch_source(branch: &AutoCommit) -> Option<BranchSource> {
    let metadata = doc::find_entry(branch, doc::BRANCH_METADATA, ObjType::Map).ok()?;
    let Some((ObjType::Map, pointer)) = doc::object_entry(branch, &metadata, doc::SOURCE) else {
        return None;
    };
    let url = doc::read_string(branch, &pointer, URL)?;
    let branch_heads = doc::read_heads_list(branch, &pointer, BRANCH_HEADS);
    Some(BranchSource { url, branch_heads })
}

/// Whether the source has changes the branch has not seen, judged by the
/// branch's stored source pointer. A branch without a pointer is never
/// reported stale.
pub fn is_stale(branch: &AutoCommit, source: &mut AutoCommit) -> bool {
    match branch_source(branch) {
        Some(pointer) => {
            let mut live = source.get_heads();
            let mut seen = pointer.branch_heads;
            live.sort();
            seen.sort();
            live != seen
        }
        None => false,
    }
}

/// List the branch descriptors recorded in a source document, skipping
/// malformed entries.
pub fn list_branches(doc: &AutoCommit) -> Vec<Branch> {
    let Ok(metadata) = doc::find_entry(doc, doc::BRANCH_METADATA, ObjType::Map) else {
        return Vec::new();
    };
    let Some((ObjType::List, list)) = doc::object_entry(doc, &metadata, doc::BRANCHES) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for i in 0..doc.length(&list) {
        let Some((ObjType::Map, slot)) = doc::object_entry(doc, &list, i) else {
            log::warn!("skipping malformed branch descriptor {}", i);
            continue;
        };
        let (Some(name), Some(url)) = (
            doc::read_string(doc, &slot, NAME),
            doc::read_string(doc, &slot, URL),
        ) else {
            log::warn!("skipping branch descriptor {} without name or url", i);
            continue;
        };

        let merge_metadata = match doc::object_entry(doc, &slot, MERGE_METADATA) {
            Some((ObjType::Map, merge)) => Some(MergeMetadata {
                merged_at: doc::read_i64(doc, &merge, MERGED_AT).unwrap_or(0),
                merge_heads: doc::read_heads_list(doc, &merge, MERGE_HEADS),
                merged_by: doc::read_string(doc, &merge, MERGED_BY),
            }),
            _ => None,
        };

        out.push(Branch {
            name,
            url,
            created_at: doc::read_i64(doc, &slot, CREATED_AT).unwrap_or(0),
            created_by: doc::read_string(doc, &slot, CREATED_BY),
            branch_heads: doc::read_heads_list(doc, &slot, BRANCH_HEADS),
            merge_metadata,
        });
    }
    out
}

fn find_branch_slot(doc: &AutoCommit, url: &str) -> Option<(ObjId, usize)> {
    let metadata = doc::find_entry(doc, doc::BRANCH_METADATA, ObjType::Map).ok()?;
    let Some((ObjType::List, list)) = doc::object_entry(doc, &metadata, doc::BRANCHES) else {
        return None;
    };
    for i in 0..doc.length(&list) {
        if let Some((ObjType::Map, slot)) = doc::object_entry(doc, &list, i)
            && doc::read_string(doc, &slot, URL).as_deref() == Some(url)
        {
            return Some((list, i));
        }
    }
    None
}

fn branches_list(doc: &mut AutoCommit, metadata: &ObjId) -> Result<ObjId> {
    match doc::object_entry(doc, metadata, doc::BRANCHES) {
        Some((ObjType::List, list)) => Ok(list),
        _ => Ok(doc.put_object(metadata, doc::BRANCHES, ObjType::List)?),
    }
}

// ==================== Markers ====================

/// Collect the history markers a document carries: its tags plus every
/// merged branch.
pub fn markers_for(doc: &AutoCommit) -> Vec<Marker> {
    let mut markers: Vec<Marker> = list_tags(doc).into_iter().map(Marker::Tag).collect();
    for branch in list_branches(doc) {
        if let Some(merge) = branch.merge_metadata {
            markers.push(Marker::MergedBranch {
                name: branch.name,
                merge_heads: merge.merge_heads,
            });
        }
    }
    markers
}
