//! Partial count merging and result ordering.

use std::cmp::Ordering;
use std::fmt;

use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};

use crate::record::CountMap;

/// Number of records carrying a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyCount {
    pub name: String,
    pub count: u64,
}

impl KeyCount {
    pub fn new(name: impl Into<String>, count: u64) -> Self {
        KeyCount {
            name: name.into(),
            count,
        }
    }
}

impl fmt::Display for KeyCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.count)
    }
}

/// Result order: ascending count, ties broken by ascending key name.
pub fn compare(a: &KeyCount, b: &KeyCount) -> Ordering {
    a.count.cmp(&b.count).then_with(|| a.name.cmp(&b.name))
}

/// Sums the counts of identical keys across all maps.
/// The largest map is reused as the merge target.
pub fn merge_counts<I>(maps: I) -> CountMap
where
    I: IntoIterator<Item = CountMap>,
{
    let mut maps = Vec::from_iter(maps);
    let largest = maps
        .iter()
        .enumerate()
        .max_by_key(|(_, map)| map.len())
        .map(|(idx, _)| idx);

    let mut merged = match largest {
        Some(idx) => maps.swap_remove(idx),
        None => return CountMap::new(),
    };

    for map in maps {
        for (name, count) in map {
            *merged.entry(name).or_insert(0) += count;
        }
    }

    return merged;
}

/// Converts a count map into entries ordered by [`compare`].
/// Sorting runs on the current rayon thread pool.
pub fn into_sorted(counts: CountMap) -> Vec<KeyCount> {
    let mut entries = Vec::from_iter(counts.into_iter().map(|(name, count)| KeyCount { name, count }));
    // keys are unique, stability is irrelevant
    entries.par_sort_unstable_by(compare);

    return entries;
}

#[cfg(test)]
mod test {
    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{compare, into_sorted, merge_counts, KeyCount};
    use crate::record::CountMap;

    fn count_map(entries: &[(&str, u64)]) -> CountMap {
        entries.iter().map(|(name, count)| (name.to_string(), *count)).collect()
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![]], vec![])]
    #[case(
        vec![
            vec![("a.com", 1), ("b.com", 2)],
            vec![],
            vec![("b.com", 3), ("c.com", 1)],
            vec![("a.com", 4)],
        ],
        vec![("a.com", 5), ("b.com", 5), ("c.com", 1)],
    )]
    fn test_merge_counts(#[case] maps: Vec<Vec<(&str, u64)>>, #[case] expected: Vec<(&str, u64)>) {
        let merged = merge_counts(maps.iter().map(|m| count_map(m)));
        assert_eq!(merged, count_map(&expected));
    }

    #[test]
    fn test_into_sorted() {
        let mut entries = vec![
            ("github.io", 2),
            ("cyberchimps.com", 2),
            ("statcounter.com", 1),
            ("rediff.com", 1),
            ("acquirethisname.com", 2),
            ("chicagocyberchimpstribune.com", 1),
            ("blogtalkradio.com", 1),
        ];
        entries.shuffle(&mut rand::thread_rng());

        let actual: Vec<String> = into_sorted(count_map(&entries)).iter().map(KeyCount::to_string).collect();
        assert_eq!(
            actual,
            vec![
                "blogtalkradio.com:1",
                "chicagocyberchimpstribune.com:1",
                "rediff.com:1",
                "statcounter.com:1",
                "acquirethisname.com:2",
                "cyberchimps.com:2",
                "github.io:2",
            ]
        );
    }

    #[test]
    fn test_into_sorted_large() {
        let counts: CountMap = (0..10_000u64).map(|i| (format!("key{}", i % 5000), i % 17)).collect();
        let sorted = into_sorted(counts.clone());

        assert_eq!(sorted.len(), counts.len());
        assert!(sorted.windows(2).all(|w| compare(&w[0], &w[1]).is_lt()));
    }

    #[test]
    fn test_empty_key_sorts_first_among_ties() {
        let sorted = into_sorted(count_map(&[("b", 1), ("", 1), ("a", 1)]));
        assert_eq!(sorted, vec![KeyCount::new("", 1), KeyCount::new("a", 1), KeyCount::new("b", 1)]);
    }
}
