//! Property-based tests for the patch consolidator.

use proptest::prelude::*;

use backstitch::patch::{
    DeletePatch, SplicePatch, TextPatch, consolidate, net_delta, overlap_end, overlap_start,
};

// =============================================================================
// Test helpers
// =============================================================================

/// One generated edit in a synthetic patch stream.
#[derive(Clone, Debug)]
enum SpecOp {
    /// A lone insertion.
    Splice { text: String },
    /// A lone deletion.
    Delete { removed: String },
    /// An insertion immediately followed by a deletion at its end, the
    /// shape the engine emits for a replacement.
    Pair { inserted: String, removed: String },
}

/// Short fragments over a tiny alphabet with spaces, so word-boundary
/// overlaps actually occur.
fn arbitrary_fragment() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof![Just('a'), Just('b'), Just(' ')], 1..12)
        .prop_map(|chars| chars.into_iter().collect())
}

fn arbitrary_spec() -> impl Strategy<Value = SpecOp> {
    prop_oneof![
        arbitrary_fragment().prop_map(|text| SpecOp::Splice { text }),
        arbitrary_fragment().prop_map(|removed| SpecOp::Delete { removed }),
        (arbitrary_fragment(), arbitrary_fragment())
            .prop_map(|(inserted, removed)| SpecOp::Pair { inserted, removed }),
    ]
}

/// Lay the generated ops out left to right with ascending positions,
/// the way a real diff stream arrives.
fn build_stream(specs: &[SpecOp], gap: usize) -> Vec<TextPatch> {
    let mut at = 0usize;
    let mut out = Vec::new();
    for spec in specs {
        at += gap + 1;
        match spec {
            SpecOp::Splice { text } => {
                out.push(TextPatch::Splice(SplicePatch {
                    at,
                    text: text.clone(),
                }));
                at += text.chars().count();
            }
            SpecOp::Delete { removed } => {
                out.push(TextPatch::Delete(DeletePatch {
                    at,
                    len: removed.chars().count(),
                    removed: removed.clone(),
                }));
            }
            SpecOp::Pair { inserted, removed } => {
                out.push(TextPatch::Splice(SplicePatch {
                    at,
                    text: inserted.clone(),
                }));
                let end = at + inserted.chars().count();
                out.push(TextPatch::Delete(DeletePatch {
                    at: end,
                    len: removed.chars().count(),
                    removed: removed.clone(),
                }));
                at = end;
            }
        }
    }
    out
}

// =============================================================================
// Consolidation properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Consolidating a second time changes nothing.
    #[test]
    fn consolidate_is_idempotent(
        specs in prop::collection::vec(arbitrary_spec(), 0..8),
        gap in 0..3usize,
    ) {
        let raw = build_stream(&specs, gap);
        let once = consolidate(raw);
        let twice = consolidate(once.clone());
        prop_assert_eq!(once, twice);
    }

    /// Overlap trimming and replace synthesis move characters around but
    /// never change the net length effect of the stream.
    #[test]
    fn net_length_change_is_preserved(
        specs in prop::collection::vec(arbitrary_spec(), 0..8),
        gap in 0..3usize,
    ) {
        let raw = build_stream(&specs, gap);
        let expected = net_delta(&raw);
        let consolidated = consolidate(raw);
        prop_assert_eq!(net_delta(&consolidated), expected);
    }

    /// Output is always sorted by position.
    #[test]
    fn output_stays_sorted(
        specs in prop::collection::vec(arbitrary_spec(), 0..8),
        gap in 0..3usize,
    ) {
        let consolidated = consolidate(build_stream(&specs, gap));
        for pair in consolidated.windows(2) {
            prop_assert!(pair[0].at() <= pair[1].at());
        }
    }
}

// =============================================================================
// Overlap properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A string fully overlaps itself, overlap is symmetric in its
    /// arguments, and no overlap exceeds either input.
    #[test]
    fn overlap_is_bounded_and_symmetric(
        a in arbitrary_fragment(),
        b in arbitrary_fragment(),
    ) {
        let a_len = a.chars().count();
        let b_len = b.chars().count();
        prop_assert_eq!(overlap_start(&a, &a), a_len);
        prop_assert_eq!(overlap_end(&b, &b), b_len);
        prop_assert_eq!(overlap_start(&a, &b), overlap_start(&b, &a));
        prop_assert_eq!(overlap_end(&a, &b), overlap_end(&b, &a));
        prop_assert!(overlap_start(&a, &b) <= a_len.min(b_len));
        prop_assert!(overlap_end(&a, &b) <= a_len.min(b_len));
    }

    /// The prefix overlap really is a common prefix, and for distinct
    /// strings it never ends inside a word.
    #[test]
    fn prefix_overlap_respects_word_boundaries(
        a in arbitrary_fragment(),
        b in arbitrary_fragment(),
    ) {
        let k = overlap_start(&a, &b);
        let a_prefix: Vec<char> = a.chars().take(k).collect();
        let b_prefix: Vec<char> = b.chars().take(k).collect();
        prop_assert_eq!(&a_prefix, &b_prefix);
        if a != b && k > 0 {
            prop_assert_eq!(a_prefix[k - 1], ' ');
        }
    }

    /// Same for the suffix overlap, reading from the other end.
    #[test]
    fn suffix_overlap_respects_word_boundaries(
        a in arbitrary_fragment(),
        b in arbitrary_fragment(),
    ) {
        let k = overlap_end(&a, &b);
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        prop_assert_eq!(&a_chars[a_chars.len() - k..], &b_chars[b_chars.len() - k..]);
        if a != b && k > 0 {
            // The kept suffix begins at the space that anchored the
            // boundary.
            prop_assert_eq!(a_chars[a_chars.len() - k], ' ');
        }
    }
}
