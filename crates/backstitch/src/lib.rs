#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Stable content anchors built on engine cursors
pub mod anchor;

/// Annotations (added/deleted/changed/highlighted ranges derived from diffs)
pub mod annotation;

/// Branch and tag metadata, including timeline markers
pub mod branch;

/// Change-log decoding
pub mod change;

/// Versioned document schema and content editing
pub mod doc;

/// Discussion threads anchored to document content
pub mod discussion;

/// Error (common error types)
pub mod error;

/// Change grouping engine and its policies
pub mod grouping;

/// Incremental grouping cache for live documents
pub mod live;

/// Text patches and the diff consolidator
pub mod patch;

/// Annotation grouping and review selection state
pub mod review;
