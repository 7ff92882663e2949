//! Incremental grouping for live documents.
//!
//! Regrouping a long change log on every keystroke is wasted work, so
//! [`LiveHistory`] keeps the decoded log between notifications and only
//! decodes the new suffix each time. Recomputes are debounced over a
//! quiet window; the one exception is a change to the document's
//! markers, which moves group boundaries and is reflected immediately.
//!
//! The whole cache rests on one invariant: the engine only ever appends
//! to the change log. That is checked on every sync, and a violation
//! drops the cache and surfaces as [`BackstitchError::CacheInvalidated`]
//! rather than silently producing stale groups. The next sync after an
//! invalidation re-decodes the document from scratch.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use automerge::AutoCommit;

use crate::branch::{self, Marker};
use crate::change::ChangeRecord;
use crate::error::{BackstitchError, Result};
use crate::grouping::{self, GroupingOptions, GroupingPolicy, GroupingResult};

/// Quiet window before a recompute after ordinary edits.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Maximum number of memoized grouping results.
const MEMO_MAX: usize = 8;

/// Callback invoked with each freshly computed grouping.
pub type GroupingListener = Arc<dyn Fn(&GroupingResult) + Send + Sync>;

/// Memo key: a grouping result is reusable only for the same options
/// over the same log length and marker set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    policy: GroupingPolicy,
    param_bits: u64,
    change_count: usize,
    markers_fp: u64,
}

/// Append-only grouping cache for one live document.
///
/// Drive it with [`note_change`](Self::note_change) from the document's
/// change notifications and [`poll`](Self::poll) from a timer tick; both
/// take the current instant so callers (and tests) control time.
pub struct LiveHistory {
    options: GroupingOptions,
    window: Duration,
    /// Decoded change log, kept across notifications.
    decoded: Vec<ChangeRecord>,
    /// Memoized grouping results, trimmed oldest-first.
    memo: HashMap<MemoKey, Arc<GroupingResult>>,
    memo_order: Vec<MemoKey>,
    markers_fp: u64,
    /// When the first not-yet-computed change arrived.
    dirty_since: Option<Instant>,
    last: Option<Arc<GroupingResult>>,
    listeners: Vec<(usize, GroupingListener)>,
    next_listener: usize,
}

impl LiveHistory {
    /// Cache with the default debounce window.
    pub fn new(options: GroupingOptions) -> Self {
        Self::with_debounce(options, DEFAULT_DEBOUNCE)
    }

    /// Cache with a caller-chosen debounce window.
    pub fn with_debounce(options: GroupingOptions, window: Duration) -> Self {
        Self {
            options,
            window,
            decoded: Vec::new(),
            memo: HashMap::new(),
            memo_order: Vec::new(),
            markers_fp: markers_fingerprint(&[]),
            dirty_since: None,
            last: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// The grouping options currently in effect.
    pub fn options(&self) -> GroupingOptions {
        self.options
    }

    /// Swap the grouping options. Takes effect on the next recompute;
    /// call [`refresh`](Self::refresh) to apply immediately.
    pub fn set_options(&mut self, options: GroupingOptions) {
        self.options = options;
    }

    /// The most recently computed grouping, if any.
    pub fn last(&self) -> Option<Arc<GroupingResult>> {
        self.last.clone()
    }

    /// Number of decoded changes currently cached.
    pub fn change_count(&self) -> usize {
        self.decoded.len()
    }

    /// Register a listener for freshly computed groupings. Returns a
    /// handle for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&mut self, listener: GroupingListener) -> usize {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: usize) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(registered, _)| *registered != id);
        self.listeners.len() != before
    }

    /// Record that the document changed.
    ///
    /// Decodes any appended changes and starts (or extends) the debounce
    /// window. If the document's markers changed, the grouping is
    /// recomputed and emitted immediately instead, since markers move
    /// group boundaries.
    ///
    /// # Errors
    ///
    /// [`BackstitchError::CacheInvalidated`] if the change log shrank or
    /// was rewritten. The cache is dropped; the next call rebuilds it.
    pub fn note_change(&mut self, doc: &mut AutoCommit, now: Instant) -> Result<()> {
        let appended = self.sync_log(doc)?;
        let markers = branch::markers_for(doc);
        if markers_fingerprint(&markers) != self.markers_fp {
            self.recompute(doc);
            return Ok(());
        }
        if appended > 0 {
            self.dirty_since.get_or_insert(now);
        }
        Ok(())
    }

    /// Recompute if the debounce window has elapsed since the first
    /// pending change. Returns the new grouping when one was computed.
    pub fn poll(&mut self, doc: &mut AutoCommit, now: Instant) -> Option<Arc<GroupingResult>> {
        let since = self.dirty_since?;
        if now.saturating_duration_since(since) < self.window {
            return None;
        }
        Some(self.recompute(doc))
    }

    /// Sync and recompute right now, skipping the debounce.
    ///
    /// # Errors
    ///
    /// [`BackstitchError::CacheInvalidated`] if the change log shrank or
    /// was rewritten.
    pub fn refresh(&mut self, doc: &mut AutoCommit) -> Result<Arc<GroupingResult>> {
        self.sync_log(doc)?;
        Ok(self.recompute(doc))
    }

    /// Drop all cached state. The next sync re-decodes the document from
    /// scratch.
    pub fn invalidate(&mut self) {
        self.decoded.clear();
        self.memo.clear();
        self.memo_order.clear();
        self.last = None;
        self.dirty_since = None;
    }

    /// Decode changes appended since the last sync, checking the
    /// append-only invariant with the log length and hash spot checks at
    /// both ends of the known prefix.
    fn sync_log(&mut self, doc: &mut AutoCommit) -> Result<usize> {
        let known = self.decoded.len();
        let (total, suffix, intact) = {
            let changes = doc.get_changes(&[]);
            let total = changes.len();
            if total < known {
                (total, Vec::new(), false)
            } else {
                let intact = known == 0
                    || (changes[0].hash() == self.decoded[0].hash
                        && changes[known - 1].hash() == self.decoded[known - 1].hash);
                let suffix: Vec<ChangeRecord> = changes[known..]
                    .iter()
                    .map(|change| ChangeRecord::from_change(change))
                    .collect();
                (total, suffix, intact)
            }
        };
        if total < known || !intact {
            log::warn!(
                "append-only change log violated ({} cached, {} in document); dropping cache",
                known,
                total
            );
            self.invalidate();
            return Err(BackstitchError::CacheInvalidated {
                reason: format!("change log rewritten: {} cached, {} in document", known, total),
            });
        }
        let appended = suffix.len();
        self.decoded.extend(suffix);
        Ok(appended)
    }

    /// Group the cached log (through the memo) and notify listeners.
    fn recompute(&mut self, doc: &mut AutoCommit) -> Arc<GroupingResult> {
        let markers = branch::markers_for(doc);
        self.markers_fp = markers_fingerprint(&markers);
        let key = MemoKey {
            policy: self.options.policy,
            param_bits: self.options.param.to_bits(),
            change_count: self.decoded.len(),
            markers_fp: self.markers_fp,
        };

        let result = match self.memo.get(&key) {
            Some(hit) => Arc::clone(hit),
            None => {
                let computed = Arc::new(grouping::group_changes(
                    doc,
                    &self.decoded,
                    self.options,
                    &markers,
                ));
                self.memo.insert(key.clone(), Arc::clone(&computed));
                self.memo_order.push(key);
                if self.memo_order.len() > MEMO_MAX {
                    let oldest = self.memo_order.remove(0);
                    self.memo.remove(&oldest);
                }
                computed
            }
        };

        self.dirty_since = None;
        self.last = Some(Arc::clone(&result));
        for (_, listener) in &self.listeners {
            listener(&result);
        }
        result
    }
}

fn markers_fingerprint(markers: &[Marker]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for marker in markers {
        marker.label().hash(&mut hasher);
        for head in marker.heads() {
            head.hash(&mut hasher);
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn edit(doc: &mut AutoCommit, text: &str) {
        doc::update_content(doc, text).unwrap();
        doc::commit_change(doc, None, None);
    }

    fn history() -> LiveHistory {
        LiveHistory::with_debounce(GroupingOptions::default(), Duration::from_millis(250))
    }

    #[test]
    fn test_debounce_coalesces_bursts() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        let mut live = history();
        let t0 = Instant::now();

        edit(&mut doc, "first");
        live.note_change(&mut doc, t0).unwrap();
        // Inside the quiet window, nothing is computed yet.
        assert!(live.poll(&mut doc, t0 + Duration::from_millis(100)).is_none());

        // A second edit extends the same pending window.
        edit(&mut doc, "first second");
        live.note_change(&mut doc, t0 + Duration::from_millis(120)).unwrap();

        let result = live.poll(&mut doc, t0 + Duration::from_millis(260)).unwrap();
        assert!(!result.change_groups.is_empty());
        // Both edits were folded into the single recompute.
        assert_eq!(result.change_count, 3);
        // Nothing pending afterwards.
        assert!(live.poll(&mut doc, t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_marker_changes_skip_the_debounce() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        let mut live = history();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        live.subscribe(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let t0 = Instant::now();

        edit(&mut doc, "tagged content");
        live.note_change(&mut doc, t0).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Creating a tag changes the marker set: recompute at once.
        crate::branch::create_tag(&mut doc, "v1", None).unwrap();
        live.note_change(&mut doc, t0 + Duration::from_millis(1)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let last = live.last().unwrap();
        assert_eq!(last.change_groups[0].markers.len(), 1);

        // The pending text edit was folded into the same recompute.
        assert!(live.poll(&mut doc, t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_rewritten_log_invalidates_cache() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        edit(&mut doc, "original history");
        let mut live = history();
        live.refresh(&mut doc).unwrap();
        assert_eq!(live.change_count(), 2);

        // A different document is a rewritten log from the cache's point
        // of view: same-or-longer length, mismatched hashes.
        let mut other = doc::init_versioned_doc(None).unwrap();
        edit(&mut other, "unrelated history");
        edit(&mut other, "unrelated history grows");
        let err = live.refresh(&mut other).unwrap_err();
        assert!(matches!(err, BackstitchError::CacheInvalidated { .. }));

        // The cache dropped everything and can rebuild against the new
        // document.
        assert_eq!(live.change_count(), 0);
        let result = live.refresh(&mut other).unwrap();
        assert_eq!(result.change_count, 3);
    }

    #[test]
    fn test_shrunken_log_invalidates_cache() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        edit(&mut doc, "one");
        edit(&mut doc, "one two");
        let mut live = history();
        live.refresh(&mut doc).unwrap();

        let mut shorter = doc::init_versioned_doc(None).unwrap();
        let err = live.note_change(&mut shorter, Instant::now()).unwrap_err();
        assert!(matches!(err, BackstitchError::CacheInvalidated { .. }));
    }

    #[test]
    fn test_memo_reuses_identical_recomputes() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        edit(&mut doc, "stable content");
        let mut live = history();

        let first = live.refresh(&mut doc).unwrap();
        let second = live.refresh(&mut doc).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // New options force a fresh computation.
        live.set_options(GroupingOptions {
            policy: GroupingPolicy::ByCount,
            param: 1.0,
        });
        let third = live.refresh(&mut doc).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let mut doc = doc::init_versioned_doc(None).unwrap();
        edit(&mut doc, "content");
        let mut live = history();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let id = live.subscribe(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        live.refresh(&mut doc).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(live.unsubscribe(id));
        assert!(!live.unsubscribe(id));
        live.refresh(&mut doc).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
