//! The partition state: cluster manager, assignment map, and TFBS-start
//! bookkeeping, with the invariant-enforcing operations the sampler drives.

use crate::cluster::{Cluster, ClusterTag};
use crate::cluster_manager::ClusterManager;
use crate::index::{Index, Range};

/// A full assignment map, pooled across sampling steps for the posterior
/// estimator.
pub type DpmPartition = Vec<Vec<Option<ClusterTag>>>;

/// An owned checkpoint of everything a single Metropolis proposal can
/// touch: the two clusters actually involved (foreground and background),
/// plus the assignment map and TFBS-start map they're keyed against.
///
/// Ground truth: `dpm_tfbs_state_t::save(cluster_tag, bg_cluster_tag)`
/// snapshots exactly these two clusters, not the whole manager, because a
/// single proposal only ever touches one foreground/background pair.
pub(crate) struct Checkpoint {
    num_tfbs: usize,
    assignments: DpmPartition,
    tfbs_start: Vec<Vec<i8>>,
    fg_cluster: Cluster,
    bg_cluster: Cluster,
}

/// The full mutable state one sampler chain owns: the cluster manager, the
/// TFBS-start map, and the motif-count/length-bound bookkeeping.
pub struct PartitionState {
    clusters: ClusterManager,
    tfbs_start: Vec<Vec<i8>>,
    num_tfbs: usize,
    bg_tag: ClusterTag,
    min_tfbs_length: usize,
    max_tfbs_length: usize,
}

impl Clone for PartitionState {
    fn clone(&self) -> Self {
        PartitionState {
            clusters: self.clusters.clone(),
            tfbs_start: self.tfbs_start.clone(),
            num_tfbs: self.num_tfbs,
            bg_tag: self.bg_tag,
            min_tfbs_length: self.min_tfbs_length,
            max_tfbs_length: self.max_tfbs_length,
        }
    }
}

impl PartitionState {
    pub fn new(
        sizes: &[usize],
        clusters: ClusterManager,
        bg_tag: ClusterTag,
        min_tfbs_length: usize,
        max_tfbs_length: usize,
    ) -> Self {
        PartitionState {
            clusters,
            tfbs_start: sizes.iter().map(|&n| vec![0i8; n]).collect(),
            num_tfbs: 0,
            bg_tag,
            min_tfbs_length,
            max_tfbs_length,
        }
    }

    pub fn clusters(&self) -> &ClusterManager {
        &self.clusters
    }

    pub fn clusters_mut(&mut self) -> &mut ClusterManager {
        &mut self.clusters
    }

    pub fn bg_tag(&self) -> ClusterTag {
        self.bg_tag
    }

    pub fn num_tfbs(&self) -> usize {
        self.num_tfbs
    }

    pub fn is_background(&self, tag: ClusterTag) -> bool {
        tag == self.bg_tag
    }

    /// True iff every position in `range` is either unowned or owned by
    /// the background cluster -- i.e. a foreground motif could legally be
    /// placed there.
    pub fn valid_tfbs_position(&self, range: Range) -> bool {
        if range.index.pos + range.length > self.tfbs_start[range.index.seq].len() {
            return false;
        }
        for i in 0..range.length {
            let idx = range.index.advanced(i);
            match self.clusters.assignment(idx) {
                None => {}
                Some(tag) if tag == self.bg_tag => {}
                _ => return false,
            }
        }
        true
    }

    /// The longest run starting at `index`, capped at `max_length`, that is
    /// entirely free (unowned or background) -- truncated at a sequence
    /// boundary or the start of an already-placed motif. `None` if that
    /// run is shorter than `min_tfbs_length`.
    pub fn get_free_range(&self, index: Index, max_length: usize) -> Option<usize> {
        let seq_len = self.tfbs_start[index.seq].len();
        let mut len = 0;
        while len < max_length {
            let pos = index.pos + len;
            if pos >= seq_len {
                break;
            }
            match self.clusters.assignment(Index::new(index.seq, pos)) {
                None => {}
                Some(tag) if tag == self.bg_tag => {}
                _ => break,
            }
            len += 1;
        }
        if len >= self.min_tfbs_length {
            Some(len)
        } else {
            None
        }
    }

    /// Add `range` to `tag`. A background tag takes the whole range
    /// unsplit; a foreground tag takes only its own fixed width, the
    /// remainder recurses into the background. Stamps `tfbs_start` and
    /// bumps `num_tfbs` only for the foreground call, never for the
    /// recursive background remainder.
    pub fn add(&mut self, range: Range, tag: ClusterTag) {
        if tag == self.bg_tag {
            self.add_background(range);
            return;
        }
        let width = self
            .clusters
            .cluster(tag)
            .model()
            .width()
            .expect("add: foreground cluster must report a fixed width");
        if range.length > width {
            let head = range.prefix(width);
            let tail = range.suffix(width);
            self.clusters.add(tag, head);
            self.add(tail, self.bg_tag);
        } else {
            self.clusters.add(tag, range);
        }
        let stamp: i8 = if range.reverse { -1 } else { 1 };
        self.tfbs_start[range.index.seq][range.index.pos] = stamp;
        self.num_tfbs += 1;
    }

    /// Exact inverse of `add`: re-derives the motif's original orientation
    /// from the stored `tfbs_start` entry (the caller only needs to name
    /// the motif's start index and width, not its orientation).
    pub fn remove(&mut self, range: Range, tag: ClusterTag) {
        if tag == self.bg_tag {
            self.remove_background(range);
            return;
        }
        let stamp = self.tfbs_start[range.index.seq][range.index.pos];
        debug_assert_ne!(stamp, 0, "remove: position was never stamped by add");
        let reverse = stamp == -1;
        let width = self
            .clusters
            .cluster(tag)
            .model()
            .width()
            .expect("remove: foreground cluster must report a fixed width");
        let actual = Range::new(range.index, range.length, reverse);
        if actual.length > width {
            let head = actual.prefix(width);
            let tail = actual.suffix(width);
            self.clusters.remove(tag, head);
            self.remove(tail, self.bg_tag);
        } else {
            self.clusters.remove(tag, actual);
        }
        self.tfbs_start[range.index.seq][range.index.pos] = 0;
        self.num_tfbs -= 1;
    }

    /// Background occupancy is tracked at single-position granularity:
    /// every entry in the background cluster's own range list is exactly
    /// one column wide. This keeps `remove_background` able to reclaim any
    /// sub-span of a larger background-owned stretch (a `shift`'s
    /// destination, a motif's recursed tail) without ever needing to match
    /// a multi-column range it wasn't literally added as.
    fn add_background(&mut self, range: Range) {
        for i in 0..range.length {
            let unit = Range::new(range.index.advanced(i), 1, range.reverse);
            self.clusters.add(self.bg_tag, unit);
        }
    }

    /// Only reclaims the positions that are actually background-owned;
    /// a position with no owner yet (possible for `shift`'s destination,
    /// which `valid_tfbs_position` allows to be either background-owned or
    /// unowned) is left alone since there is nothing to remove.
    fn remove_background(&mut self, range: Range) {
        for i in 0..range.length {
            let idx = range.index.advanced(i);
            if self.clusters.assignment(idx) == Some(self.bg_tag) {
                let unit = Range::new(idx, 1, range.reverse);
                self.clusters.remove(self.bg_tag, unit);
            }
        }
    }

    /// Snapshot everything a Metropolis proposal touching `fg_tag` could
    /// mutate. Exposed to the sampler so a whole-move MH accept/reject can
    /// wrap `move_left`/`move_right`, which only roll back internally on
    /// the "cluster would be emptied" bailout, not on a rejected proposal.
    pub(crate) fn checkpoint(&self, fg_tag: ClusterTag) -> Checkpoint {
        Checkpoint {
            num_tfbs: self.num_tfbs,
            assignments: self.clusters.assignments_snapshot(),
            tfbs_start: self.tfbs_start.clone(),
            fg_cluster: self.clusters.cluster(fg_tag).clone(),
            bg_cluster: self.clusters.cluster(self.bg_tag).clone(),
        }
    }

    pub(crate) fn restore_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.num_tfbs = checkpoint.num_tfbs;
        self.tfbs_start = checkpoint.tfbs_start;
        self.clusters.restore_assignments(checkpoint.assignments);
        self.clusters.replace_cluster(checkpoint.fg_cluster);
        self.clusters.replace_cluster(checkpoint.bg_cluster);
    }

    /// Shift every range `tag` owns by `n` positions in `direction`. Each
    /// owned range is unconditionally dropped into the background first;
    /// only if the shifted destination is in-bounds and
    /// `valid_tfbs_position` does it get reclaimed back into `tag` --
    /// otherwise that one range simply stays background-owned and the loop
    /// moves on to the next range. The only case that bails out the whole
    /// move (restoring the pre-move snapshot and returning `false`) is a
    /// single-element cluster about to be vacated mid-shift, since that
    /// would destroy the cluster the move is meant to relocate. Ground
    /// truth: `dpm-tfbs-state.cc`'s `move_left`/`move_right`, which return
    /// `true` in every case but that one.
    fn shift(&mut self, tag: ClusterTag, n: usize, left: bool) -> bool {
        let checkpoint = self.checkpoint(tag);
        let ranges: Vec<Range> = self.clusters.cluster(tag).ranges().to_vec();
        for range in ranges {
            if self.clusters.cluster(tag).size() == 1 {
                self.restore_checkpoint(checkpoint);
                return false;
            }
            self.remove(range, tag);
            self.add(range, self.bg_tag);

            let destination = if left {
                range.index.pos.checked_sub(n).filter(|&p| p > 0)
            } else {
                let seq_len = self.tfbs_start[range.index.seq].len();
                let p = range.index.pos + n;
                if p + range.length <= seq_len {
                    Some(p)
                } else {
                    None
                }
            };

            if let Some(pos) = destination {
                let shifted = Range::new(Index::new(range.index.seq, pos), range.length, range.reverse);
                if self.valid_tfbs_position(shifted) {
                    self.remove(shifted, self.bg_tag);
                    self.add(shifted, tag);
                }
            }
        }
        true
    }

    pub fn move_left(&mut self, tag: ClusterTag, n: usize) -> bool {
        self.shift(tag, n, true)
    }

    pub fn move_right(&mut self, tag: ClusterTag, n: usize) -> bool {
        self.shift(tag, n, false)
    }

    /// The foreground assignment map, used to pool samples for the
    /// posterior estimator. Background-owned positions are excluded --
    /// "partition" (spec.md glossary) names only the foreground motif-start
    /// subsets, background is their implicit complement and is never
    /// itself enumerated. Ground truth: `dpm_tfbs_state_t::partition()`,
    /// which skips every cluster `is_background` reports true for.
    pub fn partition(&self) -> DpmPartition {
        let mut map = self.clusters.assignments_snapshot();
        for row in &mut map {
            for cell in row.iter_mut() {
                if *cell == Some(self.bg_tag) {
                    *cell = None;
                }
            }
        }
        map
    }

    /// Sum of every used cluster's (including background's) log
    /// likelihood under its current sufficient statistics -- the quantity
    /// a Metropolis proposal's acceptance ratio compares before and after
    /// the move.
    pub fn total_log_likelihood(&self) -> f64 {
        self.clusters.used_clusters().map(|c| c.model().log_likelihood()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStore;
    use crate::model::product_dirichlet::ProductDirichlet;
    use crate::model::background::IndependenceBackground;
    use std::sync::Arc;

    fn make_state(seq_len: usize) -> (PartitionState, ClusterTag) {
        let data = Arc::new(DataStore::new(vec![vec![[1.0, 1.0, 1.0, 1.0, 0.0]; seq_len]]));
        let mut mgr = ClusterManager::new(&[seq_len]);
        let bg_model = Box::new(IndependenceBackground::new([1.0; 5], &data, None));
        let bg_tag = mgr.add_fixed_cluster(bg_model);
        let baseline = mgr.register_baseline(Box::new(ProductDirichlet::new(4, [0.5; 5], data)));
        let fg_tag = mgr.acquire_free_cluster(baseline);
        let state = PartitionState::new(&[seq_len], mgr, bg_tag, 4, 20);
        (state, fg_tag)
    }

    #[test]
    fn add_then_remove_restores_num_tfbs_and_assignment_map() {
        let (mut state, fg_tag) = make_state(30);
        let range = Range::forward(Index::new(0, 5), 4);
        state.add(range, fg_tag);
        assert_eq!(state.num_tfbs(), 1);
        assert!(!state.valid_tfbs_position(range));

        state.remove(range, fg_tag);
        assert_eq!(state.num_tfbs(), 0);
        assert!(state.valid_tfbs_position(range));
    }

    #[test]
    fn get_free_range_truncates_at_existing_motif() {
        let (mut state, fg_tag) = make_state(30);
        state.add(Range::forward(Index::new(0, 10), 4), fg_tag);
        let free = state.get_free_range(Index::new(0, 0), 20);
        assert_eq!(free, Some(10));
    }

    #[test]
    fn move_right_relocates_the_motif_and_preserves_num_tfbs() {
        let (mut state, fg_tag) = make_state(30);
        let range = Range::forward(Index::new(0, 5), 4);
        state.add(range, fg_tag);
        let ok = state.move_right(fg_tag, 3);
        assert!(ok);
        assert_eq!(state.num_tfbs(), 1);
        assert!(!state.valid_tfbs_position(Range::forward(Index::new(0, 8), 4)));
    }

    /// A foreground cluster emptied by `remove` is recycled -- the same
    /// tag comes back from the next `acquire_free_cluster` of the same
    /// baseline, rather than minting a new one.
    #[test]
    fn emptied_foreground_cluster_is_recycled_on_next_acquire() {
        let data = Arc::new(DataStore::new(vec![vec![[1.0, 1.0, 1.0, 1.0, 0.0]; 30]]));
        let mut mgr = ClusterManager::new(&[30]);
        let bg_tag = mgr.add_fixed_cluster(Box::new(IndependenceBackground::new([1.0; 5], &data, None)));
        let baseline = mgr.register_baseline(Box::new(ProductDirichlet::new(10, [0.5; 5], data)));
        let mut state = PartitionState::new(&[30], mgr, bg_tag, 10, 10);

        let fg_tag = state.clusters_mut().acquire_free_cluster(baseline);
        let range = Range::forward(Index::new(0, 0), 10);
        state.add(range, fg_tag);
        assert_eq!(state.num_tfbs(), 1);

        state.remove(range, fg_tag);
        assert_eq!(state.num_tfbs(), 0);
        assert!(state.clusters().cluster(fg_tag).is_empty());

        let reused_tag = state.clusters_mut().acquire_free_cluster(baseline);
        assert_eq!(fg_tag, reused_tag);
    }
}
