//! Annotation grouping and review-surface selection state.
//!
//! Takes the flat annotation list the mapper produces and turns it into
//! the clusters a review sidebar renders: unresolved discussions claim
//! the annotations overlapping their targets, whatever is left is
//! clustered by a doctype hook, and the result is sorted into document
//! order. Hover and selection are two independent single-slot state
//! machines layered on top, with structural no-op guards so editors
//! that fire events eagerly do not cause redundant re-renders.

use automerge::AutoCommit;

use crate::anchor::Anchor;
use crate::annotation::Annotation;
use crate::discussion::Discussion;

/// Doctype-specific behavior for the review surface.
///
/// The defaults are deliberately conservative: anchors overlap only when
/// equal, leftover annotations stay ungrouped, and groups sort by plain
/// document position. A doctype overrides what it can do better.
pub trait DoctypeHooks {
    /// Whether two anchors address overlapping content.
    fn anchors_overlap(&self, doc: &AutoCommit, a: &Anchor, b: &Anchor) -> bool {
        let _ = doc;
        a == b
    }

    /// Cluster leftover, unclaimed annotations into display groups.
    fn cluster(&self, doc: &AutoCommit, annotations: Vec<Annotation>) -> Vec<Vec<Annotation>> {
        let _ = doc;
        annotations.into_iter().map(|a| vec![a]).collect()
    }

    /// Document-order position used to sort groups.
    fn position(&self, doc: &AutoCommit, anchor: &Anchor) -> Option<usize> {
        anchor.position(doc)
    }
}

/// Hooks for plain text content: anchors overlap when their resolved
/// ranges intersect.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextHooks;

impl DoctypeHooks for TextHooks {
    fn anchors_overlap(&self, doc: &AutoCommit, a: &Anchor, b: &Anchor) -> bool {
        a.overlaps(b, doc)
    }
}

/// A display cluster of annotations, optionally claimed by a discussion.
#[derive(Debug, Clone)]
pub struct AnnotationGroup {
    /// Member annotations, in claim or cluster order.
    pub annotations: Vec<Annotation>,
    /// The discussion that claimed this group, if any.
    pub discussion: Option<Discussion>,
}

impl AnnotationGroup {
    /// Stable id: the claiming discussion's id, or the first member's
    /// start cursor.
    pub fn id(&self) -> String {
        if let Some(discussion) = &self.discussion {
            return discussion.id.clone();
        }
        self.annotations
            .first()
            .map(|a| a.anchor().start.clone())
            .unwrap_or_default()
    }

    /// Every anchor the group covers: the claiming discussion's targets
    /// first, then member annotation anchors.
    pub fn anchors(&self) -> Vec<&Anchor> {
        let mut out: Vec<&Anchor> = self
            .discussion
            .iter()
            .flat_map(|d| d.target.iter())
            .collect();
        out.extend(self.annotations.iter().map(Annotation::anchor));
        out
    }
}

/// Cluster annotations against live discussions.
///
/// Unresolved discussions claim overlapping annotations first; a
/// discussion whose every non-empty target has become unresolvable
/// (its content was deleted) is dropped entirely. Leftover annotations
/// are clustered by the hooks, and the resulting groups are sorted by
/// the document position of their first anchor, unplaceable groups
/// last.
pub fn group_annotations(
    doc: &AutoCommit,
    annotations: Vec<Annotation>,
    discussions: &[Discussion],
    hooks: &dyn DoctypeHooks,
) -> Vec<AnnotationGroup> {
    let mut pool = annotations;
    let mut groups = Vec::new();

    for discussion in discussions {
        if discussion.resolved {
            continue;
        }
        if !discussion.target.is_empty()
            && discussion.target.iter().all(|t| t.resolve(doc).is_none())
        {
            log::debug!(
                "discussion {} targets deleted content, hiding it",
                discussion.id
            );
            continue;
        }
        let (claimed, rest): (Vec<Annotation>, Vec<Annotation>) =
            pool.into_iter().partition(|a| {
                discussion
                    .target
                    .iter()
                    .any(|t| hooks.anchors_overlap(doc, a.anchor(), t))
            });
        pool = rest;
        groups.push(AnnotationGroup {
            annotations: claimed,
            discussion: Some(discussion.clone()),
        });
    }

    for cluster in hooks.cluster(doc, pool) {
        if cluster.is_empty() {
            continue;
        }
        groups.push(AnnotationGroup {
            annotations: cluster,
            discussion: None,
        });
    }

    groups.sort_by_key(|g| {
        g.anchors()
            .first()
            .and_then(|a| hooks.position(doc, a))
            .unwrap_or(usize::MAX)
    });
    groups
}

// ==================== Selection state ====================

/// What the pointer is over.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Hover {
    /// Nothing hovered.
    #[default]
    None,
    /// A single anchored range.
    Anchor(Anchor),
    /// A whole annotation group, by id.
    Group(String),
}

/// What is selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Selection {
    /// Nothing selected.
    #[default]
    None,
    /// A set of anchors not covered by any one group.
    Anchors(Vec<Anchor>),
    /// A whole annotation group, by id.
    Group(String),
}

/// Display state of an annotation group, derived from hover and
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Hovered but not selected.
    Focused,
    /// Selected, showing its full content.
    Expanded,
    /// Neither.
    Neutral,
}

/// Hover and selection for one review surface.
#[derive(Debug, Clone, Default)]
pub struct ReviewState {
    hover: Hover,
    selection: Selection,
}

impl ReviewState {
    /// Fresh state with nothing hovered or selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current hover slot.
    pub fn hover(&self) -> &Hover {
        &self.hover
    }

    /// The current selection slot.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Replace the hover slot. Returns whether anything changed.
    pub fn set_hover(&mut self, hover: Hover) -> bool {
        if self.hover == hover {
            return false;
        }
        self.hover = hover;
        true
    }

    /// Replace the selection slot. Returns whether anything changed.
    pub fn set_selection(&mut self, selection: Selection) -> bool {
        if self.selection == selection {
            return false;
        }
        self.selection = selection;
        true
    }

    /// Select a set of anchors, snapping to the first group whose
    /// anchors cover the whole set. Snapping widens the selection to the
    /// entire group. Returns whether anything changed.
    pub fn select_anchors(&mut self, anchors: Vec<Anchor>, groups: &[AnnotationGroup]) -> bool {
        if anchors.is_empty() {
            return self.set_selection(Selection::None);
        }
        let covering = groups.iter().find(|g| {
            let covered = g.anchors();
            anchors.iter().all(|a| covered.iter().any(|c| *c == a))
        });
        match covering {
            Some(group) => self.set_selection(Selection::Group(group.id())),
            None => self.set_selection(Selection::Anchors(anchors)),
        }
    }

    /// Derived display state for one group.
    pub fn group_state(&self, group: &AnnotationGroup) -> GroupState {
        let id = group.id();
        if matches!(&self.selection, Selection::Group(selected) if *selected == id) {
            return GroupState::Expanded;
        }
        let hovered = match &self.hover {
            Hover::Group(hovered) => *hovered == id,
            Hover::Anchor(anchor) => group.anchors().iter().any(|a| *a == anchor),
            Hover::None => false,
        };
        if hovered {
            GroupState::Focused
        } else {
            GroupState::Neutral
        }
    }
}
