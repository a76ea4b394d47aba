//! A single mixture component: a component model plus the set of ranges
//! it currently owns.

use crate::index::Range;
use crate::model::{BaselineTag, ComponentModel};

/// A stable integer identifier assigned at cluster creation and never
/// reused (see DESIGN.md Open Question 1 on the tag-vs-occupancy
/// distinction spec.md S3 calls out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterTag(pub u32);

/// Events fired by a cluster's size/content transitions, consumed by the
/// owning `ClusterManager` (spec.md sec.4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterEvent {
    AddWord { tag: ClusterTag, range: Range },
    RemoveWord { tag: ClusterTag, range: Range },
    BecameEmpty(ClusterTag),
    BecameNonempty(ClusterTag),
}

/// One mixture component: its model, the ranges it owns, and whether it
/// may be recycled when empty.
pub struct Cluster {
    tag: ClusterTag,
    baseline: Option<BaselineTag>,
    model: Box<dyn ComponentModel>,
    destructible: bool,
    ranges: Vec<Range>,
    size: usize,
}

impl Clone for Cluster {
    fn clone(&self) -> Self {
        Cluster {
            tag: self.tag,
            baseline: self.baseline,
            model: self.model.clone_box(),
            destructible: self.destructible,
            ranges: self.ranges.clone(),
            size: self.size,
        }
    }
}

impl Cluster {
    pub fn new(
        tag: ClusterTag,
        baseline: Option<BaselineTag>,
        model: Box<dyn ComponentModel>,
        destructible: bool,
    ) -> Self {
        Cluster {
            tag,
            baseline,
            model,
            destructible,
            ranges: Vec::new(),
            size: 0,
        }
    }

    pub fn tag(&self) -> ClusterTag {
        self.tag
    }

    pub fn baseline(&self) -> Option<BaselineTag> {
        self.baseline
    }

    pub fn destructible(&self) -> bool {
        self.destructible
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn model(&self) -> &dyn ComponentModel {
        self.model.as_ref()
    }

    /// `Some(alpha + n)` matrix for a foreground cluster's model, `None`
    /// for the background.
    pub fn sufficient_stats(&self) -> Option<Vec<crate::alphabet::ColumnCounts>> {
        self.model.sufficient_stats()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Add `range`'s observations to the model and record ownership.
    /// Returns the events this transition fires -- always an `AddWord`,
    /// plus a `BecameNonempty` iff the cluster was empty beforehand.
    /// Invariant maintained: `size == sum of counts returned by add()`,
    /// kept in exact correspondence with `ranges`.
    pub fn add_observations(&mut self, range: Range) -> Vec<ClusterEvent> {
        let was_empty = self.is_empty();
        let n = self.model.add(range);
        self.ranges.push(range);
        self.size += n;

        let mut events = vec![ClusterEvent::AddWord {
            tag: self.tag,
            range,
        }];
        if was_empty && self.size > 0 {
            events.push(ClusterEvent::BecameNonempty(self.tag));
        }
        events
    }

    /// Remove `range`'s observations; `range` must be exactly a range
    /// this cluster was previously told to add (spec.md sec.4.2: "remove
    /// must be the exact inverse of a prior add of the same range").
    pub fn remove_observations(&mut self, range: Range) -> Vec<ClusterEvent> {
        let pos = self
            .ranges
            .iter()
            .position(|r| *r == range)
            .expect("remove_observations: range was never added to this cluster");
        self.ranges.swap_remove(pos);

        let n = self.model.remove(range);
        self.size -= n;

        let mut events = vec![ClusterEvent::RemoveWord {
            tag: self.tag,
            range,
        }];
        if self.size == 0 {
            events.push(ClusterEvent::BecameEmpty(self.tag));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStore;
    use crate::index::Index;
    use crate::model::product_dirichlet::ProductDirichlet;
    use std::sync::Arc;

    fn make_cluster() -> Cluster {
        let data = Arc::new(DataStore::new(vec![vec![[1.0, 1.0, 1.0, 1.0, 0.0]; 20]]));
        let model = Box::new(ProductDirichlet::new(4, [0.5; 5], data));
        Cluster::new(ClusterTag(1), Some(BaselineTag(0)), model, true)
    }

    #[test]
    fn add_then_remove_restores_emptiness_and_fires_matching_events() {
        let mut c = make_cluster();
        let range = Range::forward(Index::new(0, 0), 4);
        let add_events = c.add_observations(range);
        assert!(matches!(add_events[0], ClusterEvent::AddWord { .. }));
        assert!(matches!(add_events[1], ClusterEvent::BecameNonempty(_)));
        assert_eq!(c.size(), 1);

        let remove_events = c.remove_observations(range);
        assert!(matches!(remove_events[0], ClusterEvent::RemoveWord { .. }));
        assert!(matches!(remove_events[1], ClusterEvent::BecameEmpty(_)));
        assert_eq!(c.size(), 0);
        assert!(c.ranges().is_empty());
    }

    #[test]
    #[should_panic]
    fn remove_of_unowned_range_panics() {
        let mut c = make_cluster();
        let range = Range::forward(Index::new(0, 0), 4);
        c.remove_observations(range);
    }
}
