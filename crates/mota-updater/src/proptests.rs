//! Property-based tests for mota-updater.
//!
//! # Properties Tested
//!
//! - Version ordering: padding, asymmetry, agreement with integer ordering
//! - Bounded download: accepted iff the total stays under the ceiling
//! - Entry guard detection is insensitive to whitespace runs

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;

use crate::artifact::is_entry_guard;
use crate::config::UpdateConfig;
use crate::download::testing::{ScriptedTransport, Step};
use crate::download::{ArtifactSource, BoundedDownloader, Downloader};
use crate::error::UpdateError;
use crate::store::{MemoryStore, ProgramStore};
use crate::version::is_newer;

// =============================================================================
// Generators
// =============================================================================

/// Generate a dotted numeric version with 1 to 4 components.
fn arb_components() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..50, 1..5)
}

fn join(components: &[u64]) -> String {
    components
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Generate chunk lengths for a scripted download.
fn arb_chunks() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=1024, 0..40)
}

/// Generate a run of horizontal whitespace.
fn arb_space() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof![Just(' '), Just('\t')], 1..4)
        .prop_map(|chars| chars.into_iter().collect())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

// =============================================================================
// Version ordering
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A version is never newer than itself, and trailing zeros never matter.
    #[test]
    fn prop_trailing_zeros_are_equal(components in arb_components(), zeros in 0usize..3) {
        let a = join(&components);
        let mut padded = components.clone();
        padded.extend(std::iter::repeat(0).take(zeros));
        let b = join(&padded);

        prop_assert!(!is_newer(&a, &a));
        prop_assert!(!is_newer(&a, &b));
        prop_assert!(!is_newer(&b, &a));
    }

    /// At most one of two versions is newer than the other.
    #[test]
    fn prop_is_newer_is_asymmetric(a in arb_components(), b in arb_components()) {
        let (a, b) = (join(&a), join(&b));
        prop_assert!(!(is_newer(&a, &b) && is_newer(&b, &a)));
    }

    /// Numeric comparison agrees with comparing zero-padded integer vectors.
    #[test]
    fn prop_matches_padded_vector_order(a in arb_components(), b in arb_components()) {
        let len = a.len().max(b.len());
        let mut pa = a.clone();
        let mut pb = b.clone();
        pa.resize(len, 0);
        pb.resize(len, 0);

        prop_assert_eq!(is_newer(&join(&a), &join(&b)), pb > pa);
    }
}

// =============================================================================
// Bounded download
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// The download succeeds iff the streamed total stays within the ceiling,
    /// and a rejected download never leaves a temp entry.
    #[test]
    fn prop_ceiling_is_enforced(chunks in arb_chunks(), limit in 1024u64..20_000) {
        let total: u64 = chunks.iter().map(|&n| n as u64).sum();
        let steps = chunks.iter().map(|&n| Step::Data(vec![b'x'; n])).collect();

        let store = MemoryStore::new();
        let mut config = UpdateConfig::default();
        config.max_size = limit;
        let downloader = BoundedDownloader::new(
            Arc::new(ScriptedTransport::with_steps(steps)),
            Arc::new(store.clone()),
            &config,
        );

        let source = ArtifactSource::new("mem://artifact", "1.0.0");
        let result = runtime().block_on(downloader.download(&source));

        if total <= limit {
            let artifact = result.unwrap();
            prop_assert_eq!(artifact.size(), total);
            prop_assert_eq!(store.size(&config.temp_name).unwrap(), Some(total));
        } else {
            prop_assert!(matches!(result, Err(UpdateError::Oversize { .. })), "expected Oversize");
            prop_assert_eq!(store.size(&config.temp_name).unwrap(), None);
        }
    }
}

// =============================================================================
// Entry guard
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Any whitespace runs between tokens still form a valid guard; any
    /// leading indentation does not.
    #[test]
    fn prop_guard_whitespace_insensitive(
        s1 in arb_space(), s2 in arb_space(), s3 in arb_space(), trail in arb_space(),
        double in any::<bool>(),
    ) {
        let quoted = if double { "\"__main__\":" } else { "'__main__':" };
        let line = format!("if{s1}__name__{s2}=={s3}{quoted}{trail}\n");
        prop_assert!(is_entry_guard(&line));

        let indented = format!("{s1}{line}");
        prop_assert!(!is_entry_guard(&indented));
    }
}
