// tests/dedup_property.rs

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use dirwatch::types::ChangeKind;
use dirwatch::watch::DedupFilter;

#[derive(Debug, Clone)]
enum Step {
    Notify { path: usize, kind: usize, advance_ms: u64 },
    Sweep { advance_ms: u64 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..4usize, 0..3usize, 0..120u64)
            .prop_map(|(path, kind, advance_ms)| Step::Notify { path, kind, advance_ms }),
        1 => (0..120u64).prop_map(|advance_ms| Step::Sweep { advance_ms }),
    ]
}

const KINDS: [ChangeKind; 3] = [ChangeKind::Created, ChangeKind::Changed, ChangeKind::Deleted];

proptest! {
    /// A notification is forwarded exactly when no earlier forwarded
    /// notification of the same kind and path is still inside the window,
    /// no matter when sweeps happen.
    #[test]
    fn forwarding_matches_a_last_forwarded_model(
        window_ms in 1..200u64,
        steps in proptest::collection::vec(step(), 1..80),
    ) {
        let window = Duration::from_millis(window_ms);
        let mut filter = DedupFilter::new(window);
        // Mirror of the filter: expiry per (path, kind).
        let mut live: HashMap<(usize, usize), Instant> = HashMap::new();
        let mut now = Instant::now();

        for step in steps {
            match step {
                Step::Notify { path, kind, advance_ms } => {
                    now += Duration::from_millis(advance_ms);
                    let p = PathBuf::from(format!("/w/f{path}"));
                    let forwarded = filter.should_forward(KINDS[kind], &p, now);

                    let expected = live
                        .get(&(path, kind))
                        .is_none_or(|expires| *expires <= now);
                    prop_assert_eq!(forwarded, expected);
                    if forwarded {
                        live.insert((path, kind), now + window);
                    }
                }
                Step::Sweep { advance_ms } => {
                    now += Duration::from_millis(advance_ms);
                    filter.sweep(now);
                    live.retain(|_, expires| *expires > now);
                }
            }

            prop_assert_eq!(filter.len(), live.len());
            for (k, kind) in KINDS.iter().enumerate() {
                let soonest = live
                    .iter()
                    .filter(|((_, entry_kind), _)| *entry_kind == k)
                    .map(|(_, expires)| *expires)
                    .min();
                prop_assert_eq!(filter.oldest(*kind).map(|e| e.expires), soonest);
            }
        }
    }

    #[test]
    fn renames_are_never_suppressed(repeats in 1..20usize) {
        let mut filter = DedupFilter::new(Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..repeats {
            prop_assert!(filter.should_forward(ChangeKind::Renamed, &PathBuf::from("/w/r"), now));
        }
        prop_assert!(filter.is_empty());
    }
}
