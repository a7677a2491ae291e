//! # Duplicate-Aware Binary Search
//!
//! Binary search over a sorted slice with the same contract as
//! `slice::binary_search_by`: `Ok(index)` for a hit, `Err(insertion_index)`
//! for a miss. On slices with duplicate keys, plain binary search stops at
//! an arbitrary member of the run; the occurrence-aware variant keeps
//! narrowing until it lands on the run's first or last member.
//!
//! Non-unique B-trees need both boundaries: an ascending scan from a key
//! starts at the *first* occurrence, a descending scan at the *last*, and
//! duplicate inserts route through the first occurrence so equal keys
//! accumulate leftward.

use std::cmp::Ordering;

/// Which member of a duplicate run a search should resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    First,
    Last,
}

/// Binary search with the standard-library contract.
///
/// `compare` is called with a probe element and returns its ordering
/// relative to the target. On duplicates, any matching index may be
/// returned.
pub fn binary_search_by<T, F>(items: &[T], mut compare: F) -> Result<usize, usize>
where
    F: FnMut(&T) -> Ordering,
{
    let mut lo = 0usize;
    let mut hi = items.len();

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match compare(&items[mid]) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(mid),
        }
    }

    Err(lo)
}

/// Binary search that resolves duplicate runs to their first or last index.
pub fn binary_search_occurrence<T, F>(
    items: &[T],
    mut compare: F,
    occurrence: Occurrence,
) -> Result<usize, usize>
where
    F: FnMut(&T) -> Ordering,
{
    let mut lo = 0usize;
    let mut hi = items.len();
    let mut found: Option<usize> = None;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match compare(&items[mid]) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => {
                found = Some(mid);
                match occurrence {
                    // Keep searching the left half for an earlier member.
                    Occurrence::First => hi = mid,
                    // Keep searching the right half for a later member.
                    Occurrence::Last => lo = mid + 1,
                }
            }
        }
    }

    match found {
        Some(idx) => Ok(idx),
        None => Err(lo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp_to(target: i32) -> impl FnMut(&i32) -> Ordering {
        move |probe| probe.cmp(&target)
    }

    #[test]
    fn search_empty_slice_returns_insertion_zero() {
        let items: [i32; 0] = [];

        assert_eq!(binary_search_by(&items, cmp_to(5)), Err(0));
    }

    #[test]
    fn search_finds_present_key() {
        let items = [1, 3, 5, 7, 9];

        assert_eq!(binary_search_by(&items, cmp_to(7)), Ok(3));
    }

    #[test]
    fn search_miss_returns_insertion_index() {
        let items = [1, 3, 5, 7, 9];

        assert_eq!(binary_search_by(&items, cmp_to(4)), Err(2));
        assert_eq!(binary_search_by(&items, cmp_to(0)), Err(0));
        assert_eq!(binary_search_by(&items, cmp_to(10)), Err(5));
    }

    #[test]
    fn occurrence_first_lands_on_run_start() {
        let items = [1, 2, 2, 2, 3, 4];

        let idx = binary_search_occurrence(&items, cmp_to(2), Occurrence::First);

        assert_eq!(idx, Ok(1));
    }

    #[test]
    fn occurrence_last_lands_on_run_end() {
        let items = [1, 2, 2, 2, 3, 4];

        let idx = binary_search_occurrence(&items, cmp_to(2), Occurrence::Last);

        assert_eq!(idx, Ok(3));
    }

    #[test]
    fn occurrence_on_unique_key_matches_plain_search() {
        let items = [1, 2, 2, 2, 3, 4];

        assert_eq!(
            binary_search_occurrence(&items, cmp_to(3), Occurrence::First),
            Ok(4)
        );
        assert_eq!(
            binary_search_occurrence(&items, cmp_to(3), Occurrence::Last),
            Ok(4)
        );
    }

    #[test]
    fn occurrence_miss_returns_insertion_index() {
        let items = [1, 2, 2, 2, 3, 4];

        assert_eq!(
            binary_search_occurrence(&items, cmp_to(0), Occurrence::First),
            Err(0)
        );
        assert_eq!(
            binary_search_occurrence(&items, cmp_to(5), Occurrence::Last),
            Err(6)
        );
    }

    #[test]
    fn occurrence_handles_run_spanning_whole_slice() {
        let items = [7, 7, 7, 7];

        assert_eq!(
            binary_search_occurrence(&items, cmp_to(7), Occurrence::First),
            Ok(0)
        );
        assert_eq!(
            binary_search_occurrence(&items, cmp_to(7), Occurrence::Last),
            Ok(3)
        );
    }
}
