//! MaxScore merging: iterators are kept sorted by score upper bound and
//! partitioned at a pivot into an essential set, which drives candidate
//! generation, and a non-essential set, which is only ever fast-forwarded.
//! A document whose postings all sit below the pivot cannot beat the
//! current threshold, so skipping it is safe.

use std::cmp::Ordering;

use super::PostingCursor;
use crate::EXHAUSTED_KEY;

pub struct MaxScoreMerger<C> {
    cursors: Vec<C>,
    upp: Vec<f32>,
    /// Permutation of cursor indices, sorted descending by upper bound.
    map: Vec<usize>,
    /// Suffix sums of upper bounds over `map`.
    acc_upp: Vec<f32>,
    /// `map[0..=pivot]` is the essential set.
    pivot: isize,
    min: u64,
}

impl<C: PostingCursor> MaxScoreMerger<C> {
    pub fn new(cursors: Vec<C>, upp: Vec<f32>) -> MaxScoreMerger<C> {
        debug_assert_eq!(cursors.len(), upp.len());
        let size = cursors.len();
        let mut map: Vec<usize> = (0..size).collect();
        map.sort_by(|&a, &b| upp[b].partial_cmp(&upp[a]).unwrap_or(Ordering::Equal));

        let mut merger = MaxScoreMerger {
            cursors,
            upp,
            map,
            acc_upp: vec![0.0; size],
            pivot: size as isize - 1,
            min: EXHAUSTED_KEY,
        };
        merger.update_acc_upp();
        merger.min = merger.compute_min();
        merger
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn pivot(&self) -> isize {
        self.pivot
    }

    /// The current candidate key; `EXHAUSTED_KEY` when the merge is done.
    pub fn min_key(&self) -> u64 {
        self.min
    }

    pub fn cursor(&self, map_idx: usize) -> &C {
        &self.cursors[self.map[map_idx]]
    }

    pub fn cursor_mut(&mut self, map_idx: usize) -> &mut C {
        let idx = self.map[map_idx];
        &mut self.cursors[idx]
    }

    pub fn upp(&self, map_idx: usize) -> f32 {
        self.upp[self.map[map_idx]]
    }

    /// All cursors, regardless of map order.
    pub fn all_cursors(&self) -> &[C] {
        &self.cursors
    }

    fn update_acc_upp(&mut self) {
        let mut sum = 0.0;
        for i in (0..self.map.len()).rev() {
            sum += self.upp[self.map[i]];
            self.acc_upp[i] = sum;
        }
    }

    fn compute_min(&self) -> u64 {
        let mut min = EXHAUSTED_KEY;
        for i in 0..=self.pivot {
            let cur = self.cursors[self.map[i as usize]].cur();
            if cur < min {
                min = cur;
            }
        }
        min
    }

    fn map_remove(&mut self, i: usize) {
        self.map.remove(i);
        self.acc_upp.pop();
        if self.pivot >= i as isize {
            self.pivot -= 1;
        }
        self.update_acc_upp();
    }

    /// Advances every essential iterator sitting on the candidate and
    /// recomputes it. Returns false once the essential set is drained.
    pub fn next(&mut self) -> bool {
        if self.min == EXHAUSTED_KEY {
            return false;
        }

        let mut i = 0usize;
        while i as isize <= self.pivot {
            let idx = self.map[i];
            if self.cursors[idx].cur() == self.min {
                if !self.cursors[idx].next() {
                    // compaction shifts the tail left; revisit position i
                    self.map_remove(i);
                    continue;
                }
            }
            i += 1;
        }

        self.min = self.compute_min();
        true
    }

    /// Catches a lagging iterator up to the current candidate. Non-essential
    /// iterators are allowed to lag; this is their only way forward.
    pub fn follow(&mut self, map_idx: usize) -> bool {
        let idx = self.map[map_idx];
        let cur = self.cursors[idx].cur();
        if cur == EXHAUSTED_KEY {
            return false;
        }
        if cur < self.min {
            return self.cursors[idx].advance_to(self.min);
        }
        true
    }

    /// Compacts iterators a caller drained while scoring a candidate and
    /// recomputes the candidate key.
    pub fn resync(&mut self) {
        let mut i = 0usize;
        while i < self.map.len() {
            if self.cursors[self.map[i]].cur() == EXHAUSTED_KEY {
                self.map_remove(i);
            } else {
                i += 1;
            }
        }
        self.min = self.compute_min();
    }

    /// Re-partitions after the threshold moved: the pivot drops to the
    /// deepest position whose suffix bound still beats the threshold.
    /// `relax` is the caller's bound adjustment (multiplicative factors
    /// applied before comparison). A negative pivot means no remaining key
    /// can beat the threshold and the merge is over.
    pub fn lift_up_pivot(&mut self, threshold: f32, relax: impl Fn(f32) -> f32) -> isize {
        let mut new_pivot = -1;
        let mut i = self.pivot;
        while i >= 0 {
            if relax(self.acc_upp[i as usize]) > threshold {
                new_pivot = i;
                break;
            }
            i -= 1;
        }
        self.pivot = new_pivot;
        self.min = self.compute_min();
        self.pivot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack_key;

    /// In-memory cursor over pre-built keys.
    pub(crate) struct VecCursor {
        keys: Vec<u64>,
        pos: usize,
        visited: u64,
    }

    impl VecCursor {
        pub(crate) fn new(keys: Vec<u64>) -> VecCursor {
            let visited = u64::from(!keys.is_empty());
            VecCursor { keys, pos: 0, visited }
        }
    }

    impl PostingCursor for VecCursor {
        fn cur(&self) -> u64 {
            self.keys.get(self.pos).copied().unwrap_or(EXHAUSTED_KEY)
        }

        fn next(&mut self) -> bool {
            if self.pos >= self.keys.len() {
                return false;
            }
            self.pos += 1;
            if self.pos < self.keys.len() {
                self.visited += 1;
                true
            } else {
                false
            }
        }

        fn advance_to(&mut self, target: u64) -> bool {
            while self.cur() < target {
                if !self.next() {
                    return false;
                }
            }
            self.cur() != EXHAUSTED_KEY
        }

        fn visited(&self) -> u64 {
            self.visited
        }

        fn n_records(&self) -> u64 {
            self.keys.len() as u64
        }
    }

    fn keys(docs: &[u32]) -> Vec<u64> {
        docs.iter().map(|&d| pack_key(d, 0)).collect()
    }

    #[test]
    fn merges_in_key_order_without_threshold() {
        let cursors = vec![
            VecCursor::new(keys(&[1, 4, 9])),
            VecCursor::new(keys(&[2, 4, 7])),
            VecCursor::new(keys(&[4, 11])),
        ];
        let mut merger = MaxScoreMerger::new(cursors, vec![1.0, 2.0, 0.5]);

        let mut seen = Vec::new();
        while merger.min_key() != EXHAUSTED_KEY {
            seen.push(crate::key_doc(merger.min_key()));
            merger.next();
        }
        assert_eq!(seen, vec![1, 2, 4, 7, 9, 11]);
    }

    #[test]
    fn map_is_sorted_descending_by_upper_bound() {
        let cursors =
            vec![VecCursor::new(keys(&[1])), VecCursor::new(keys(&[2])), VecCursor::new(keys(&[3]))];
        let merger = MaxScoreMerger::new(cursors, vec![0.5, 3.0, 1.5]);
        assert_eq!(merger.upp(0), 3.0);
        assert_eq!(merger.upp(1), 1.5);
        assert_eq!(merger.upp(2), 0.5);
    }

    #[test]
    fn lift_up_pivot_demotes_weak_iterators() {
        let cursors = vec![
            VecCursor::new(keys(&[1, 2, 3])),
            VecCursor::new(keys(&[1, 2, 3])),
            VecCursor::new(keys(&[1, 2, 3])),
        ];
        let mut merger = MaxScoreMerger::new(cursors, vec![4.0, 2.0, 1.0]);
        assert_eq!(merger.pivot(), 2);

        // suffix bounds are [7, 3, 1]: a threshold of 2 keeps positions 0..=1
        merger.lift_up_pivot(2.0, |x| x);
        assert_eq!(merger.pivot(), 1);

        // nothing can beat 8: the merge is over
        merger.lift_up_pivot(8.0, |x| x);
        assert!(merger.pivot() < 0);
        assert_eq!(merger.min_key(), EXHAUSTED_KEY);
    }

    #[test]
    fn follow_catches_lagging_iterators_up() {
        let cursors = vec![VecCursor::new(keys(&[5, 9])), VecCursor::new(keys(&[1, 5, 9]))];
        let mut merger = MaxScoreMerger::new(cursors, vec![3.0, 1.0]);
        merger.lift_up_pivot(2.5, |x| x);
        assert_eq!(merger.pivot(), 0);

        // candidate comes from the essential iterator alone
        assert_eq!(merger.min_key(), pack_key(5, 0));
        // the demoted iterator lags at doc 1 until followed
        assert_eq!(merger.cursor(1).cur(), pack_key(1, 0));
        assert!(merger.follow(1));
        assert_eq!(merger.cursor(1).cur(), pack_key(5, 0));
    }

    #[test]
    fn resync_compacts_externally_drained_cursors() {
        let cursors = vec![VecCursor::new(keys(&[1])), VecCursor::new(keys(&[2]))];
        let mut merger = MaxScoreMerger::new(cursors, vec![2.0, 1.0]);

        // a caller scoring doc 1 drains the first cursor by hand
        merger.cursor_mut(0).next();
        merger.resync();
        assert_eq!(merger.size(), 1);
        assert_eq!(merger.min_key(), pack_key(2, 0));
    }

    #[test]
    fn exhausted_iterators_compact_and_fix_the_pivot() {
        let cursors = vec![VecCursor::new(keys(&[1])), VecCursor::new(keys(&[1, 5]))];
        let mut merger = MaxScoreMerger::new(cursors, vec![2.0, 1.0]);

        assert_eq!(merger.min_key(), pack_key(1, 0));
        merger.next();
        // first cursor drained and was removed
        assert_eq!(merger.size(), 1);
        assert_eq!(merger.pivot(), 0);
        assert_eq!(merger.min_key(), pack_key(5, 0));
        merger.next();
        assert_eq!(merger.min_key(), EXHAUSTED_KEY);
    }
}
