//! Keeps the used/free cluster lists, recycles empty destructible
//! clusters, and maintains the per-position cluster-assignment map.

use std::collections::HashMap;

use crate::cluster::{Cluster, ClusterEvent, ClusterTag};
use crate::index::{Index, Range};
use crate::model::{BaselineTag, ComponentModel};

/// Owns every cluster (background and foreground), the free/used
/// bookkeeping, and the per-position assignment map.
///
/// Ground truth: `original_source/tfbayes/dpm/clustermanager.cc` and
/// `mixture-state.cc`. The cyclic cluster->manager observer relationship
/// from the original is modeled here as straight-line code: `add`/`remove`
/// apply the model mutation, the assignment-map update, and the free/used
/// list transition all within one `&mut self` borrow, so no external
/// observer can see a half-applied state (spec.md sec.4.1: "no observer
/// sees a half-applied add or remove").
pub struct ClusterManager {
    clusters: Vec<Cluster>,
    by_tag: HashMap<ClusterTag, usize>,
    used: Vec<ClusterTag>,
    free: Vec<ClusterTag>,
    baselines: Vec<Box<dyn ComponentModel>>,
    assignments: Vec<Vec<Option<ClusterTag>>>,
    next_tag: u32,
}

impl Clone for ClusterManager {
    fn clone(&self) -> Self {
        ClusterManager {
            clusters: self.clusters.clone(),
            by_tag: self.by_tag.clone(),
            used: self.used.clone(),
            free: self.free.clone(),
            baselines: self.baselines.iter().map(|b| b.clone_box()).collect(),
            assignments: self.assignments.clone(),
            next_tag: self.next_tag,
        }
    }
}

impl ClusterManager {
    pub fn new(sizes: &[usize]) -> Self {
        ClusterManager {
            clusters: Vec::new(),
            by_tag: HashMap::new(),
            used: Vec::new(),
            free: Vec::new(),
            baselines: Vec::new(),
            assignments: sizes.iter().map(|&n| vec![None; n]).collect(),
            next_tag: 0,
        }
    }

    fn fresh_tag(&mut self) -> ClusterTag {
        let tag = ClusterTag(self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Store a prototype component model under a fresh baseline
    /// identifier; `acquire_free_cluster` clones it on demand.
    pub fn register_baseline(&mut self, model: Box<dyn ComponentModel>) -> BaselineTag {
        let tag = BaselineTag(self.baselines.len() as u32);
        self.baselines.push(model);
        tag
    }

    /// Install a non-destructible cluster (e.g. the background). It is
    /// always considered "used" and is never placed in the free list,
    /// matching `clustermanager.cc`'s `add_cluster(ComponentModel*)`
    /// overload.
    pub fn add_fixed_cluster(&mut self, model: Box<dyn ComponentModel>) -> ClusterTag {
        let tag = self.fresh_tag();
        let cluster = Cluster::new(tag, None, model, false);
        self.by_tag.insert(tag, self.clusters.len());
        self.clusters.push(cluster);
        self.used.push(tag);
        tag
    }

    fn new_destructible_cluster(&mut self, baseline: BaselineTag) -> ClusterTag {
        let model = self.baselines[baseline.0 as usize].clone_box();
        let tag = self.fresh_tag();
        let cluster = Cluster::new(tag, Some(baseline), model, true);
        self.by_tag.insert(tag, self.clusters.len());
        self.clusters.push(cluster);
        self.free.push(tag);
        tag
    }

    /// Return an existing empty destructible cluster with matching
    /// baseline, or create one by cloning the registered prototype.
    pub fn acquire_free_cluster(&mut self, baseline: BaselineTag) -> ClusterTag {
        if let Some(&tag) = self
            .free
            .iter()
            .find(|&&tag| self.cluster(tag).baseline() == Some(baseline))
        {
            return tag;
        }
        self.new_destructible_cluster(baseline)
    }

    fn index_of(&self, tag: ClusterTag) -> usize {
        *self
            .by_tag
            .get(&tag)
            .unwrap_or_else(|| panic!("lookup of unknown cluster tag {tag:?}"))
    }

    /// Lookup is a programming error on an unknown tag: the manager never
    /// retries or recovers (spec.md sec.4.1 Failure semantics).
    pub fn cluster(&self, tag: ClusterTag) -> &Cluster {
        &self.clusters[self.index_of(tag)]
    }

    pub fn cluster_mut(&mut self, tag: ClusterTag) -> &mut Cluster {
        let idx = self.index_of(tag);
        &mut self.clusters[idx]
    }

    pub fn used_tags(&self) -> &[ClusterTag] {
        &self.used
    }

    pub fn used_clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.used.iter().map(move |&tag| self.cluster(tag))
    }

    /// The cluster tag currently owning `index`, or `None` if that
    /// position has never been added to any cluster.
    pub fn assignment(&self, index: Index) -> Option<ClusterTag> {
        self.assignments[index.seq][index.pos]
    }

    fn handle_events(&mut self, events: &[ClusterEvent]) {
        for event in events {
            match *event {
                ClusterEvent::AddWord { tag, range } => {
                    for i in 0..range.length {
                        let pos = range.index.pos + i;
                        self.assignments[range.index.seq][pos] = Some(tag);
                    }
                }
                ClusterEvent::RemoveWord { range, .. } => {
                    for i in 0..range.length {
                        let pos = range.index.pos + i;
                        self.assignments[range.index.seq][pos] = None;
                    }
                }
                ClusterEvent::BecameEmpty(tag) => {
                    if self.cluster(tag).destructible() {
                        self.used.retain(|&t| t != tag);
                        self.free.push(tag);
                    }
                }
                ClusterEvent::BecameNonempty(tag) => {
                    if self.cluster(tag).destructible() {
                        self.free.retain(|&t| t != tag);
                        self.used.push(tag);
                    }
                }
            }
        }
    }

    /// Add `range`'s observations to `tag`'s model, update the assignment
    /// map, and move `tag` between the free/used lists if its occupancy
    /// transitioned.
    pub fn add(&mut self, tag: ClusterTag, range: Range) {
        let events = self.cluster_mut(tag).add_observations(range);
        self.handle_events(&events);
    }

    /// Remove `range`'s observations from `tag`'s model, update the
    /// assignment map, and move `tag` between the free/used lists if its
    /// occupancy transitioned.
    pub fn remove(&mut self, tag: ClusterTag, range: Range) {
        let events = self.cluster_mut(tag).remove_observations(range);
        self.handle_events(&events);
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// A owned copy of the assignment map, used by `PartitionState::save`.
    pub fn assignments_snapshot(&self) -> Vec<Vec<Option<ClusterTag>>> {
        self.assignments.clone()
    }

    /// Overwrite the assignment map wholesale, used by `PartitionState::restore`.
    pub fn restore_assignments(&mut self, map: Vec<Vec<Option<ClusterTag>>>) {
        self.assignments = map;
    }

    /// The still-empty prototype model registered under `baseline`, used
    /// by the sampler to score a not-yet-created fresh cluster without
    /// mutating any cluster's sufficient statistics.
    pub fn baseline_model(&self, baseline: BaselineTag) -> &dyn ComponentModel {
        self.baselines[baseline.0 as usize].as_ref()
    }

    /// Overwrite a single cluster by its own tag and recompute its
    /// free/used list membership. Used to restore a save()'d checkpoint
    /// without touching any cluster but the one being rolled back.
    pub fn replace_cluster(&mut self, cluster: Cluster) {
        let tag = cluster.tag();
        let idx = self.index_of(tag);
        self.clusters[idx] = cluster;
        self.free.retain(|&t| t != tag);
        self.used.retain(|&t| t != tag);
        let c = &self.clusters[idx];
        if !c.destructible() || !c.is_empty() {
            self.used.push(tag);
        } else {
            self.free.push(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStore;
    use crate::model::product_dirichlet::ProductDirichlet;
    use std::sync::Arc;

    fn prototype(data: &Arc<DataStore>) -> Box<dyn ComponentModel> {
        Box::new(ProductDirichlet::new(4, [0.5; 5], data.clone()))
    }

    #[test]
    fn acquire_free_cluster_recycles_emptied_cluster() {
        let data = Arc::new(DataStore::new(vec![vec![[1.0, 1.0, 1.0, 1.0, 0.0]; 20]]));
        let mut mgr = ClusterManager::new(&[20]);
        let baseline = mgr.register_baseline(prototype(&data));

        let c1 = mgr.acquire_free_cluster(baseline);
        let range = Range::forward(Index::new(0, 0), 4);
        mgr.add(c1, range);
        assert_eq!(mgr.used_tags(), &[c1]);

        mgr.remove(c1, range);
        assert!(mgr.used_tags().is_empty());

        // requesting a free cluster of the same baseline returns the
        // recycled (now-empty) cluster rather than allocating a new tag
        let c2 = mgr.acquire_free_cluster(baseline);
        assert_eq!(c1, c2);
    }

    #[test]
    fn assignment_map_matches_owning_cluster() {
        let data = Arc::new(DataStore::new(vec![vec![[1.0, 1.0, 1.0, 1.0, 0.0]; 20]]));
        let mut mgr = ClusterManager::new(&[20]);
        let baseline = mgr.register_baseline(prototype(&data));
        let c1 = mgr.acquire_free_cluster(baseline);
        let range = Range::forward(Index::new(0, 2), 4);
        mgr.add(c1, range);
        for i in 0..4 {
            assert_eq!(mgr.assignment(Index::new(0, 2 + i)), Some(c1));
        }
        assert_eq!(mgr.assignment(Index::new(0, 0)), None);
    }

    #[test]
    #[should_panic]
    fn lookup_of_unknown_tag_panics() {
        let mgr = ClusterManager::new(&[10]);
        mgr.cluster(ClusterTag(999));
    }
}
