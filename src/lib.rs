#![doc = include_str!("../README.md")]

mod cch;
mod ch;
mod contraction;
mod customization;
mod error;
mod order;
mod query;

#[cfg(feature = "pyo3")]
mod python_binding;

// Expose test support utilities
pub mod shp_utils;

use query::{EliminationTreeQuery, QuerySetup, RunKind};
use std::borrow::Cow;

pub use ch::{CHQuery, ContractionHierarchy, DEFAULT_MAX_POP_COUNT};
pub use error::{Error, Result};
pub use order::{compute_order_degree, compute_order_inertial};
pub use query::CCHArc;

/// Arc weight, e.g. travel time or length.
pub type Weight = u32;
pub type NodeId = u32;
pub type ArcId = u32;

/// The weight of absent arcs and the distance of unreachable nodes.
pub const INFINITY: Weight = u32::MAX;

pub struct CCH {
    inner: cch::CCHStructure,
}

impl CCH {
    /// Construct a new immutable Customizable Contraction Hierarchy index.
    ///
    /// Parameters:
    /// * `order` – permutation of node ids (length = node count) produced by a fill‑in reducing
    ///   nested dissection heuristic (e.g. [`compute_order_inertial`]) or a lightweight fallback.
    /// * `tail`, `head` – parallel arrays encoding each directed arc `i` as `(tail[i], head[i])`.
    ///   The index itself is built on the undirected graph; directions matter once weights are bound.
    /// * `log_message` – receives human readable progress lines, pass `|_| {}` to ignore them.
    /// * `filter_always_inf_arcs` – if `true`, shortcuts that can never get a finite weight in either
    ///   direction are dropped. Shrinks the index on graphs with many one-way streets.
    ///
    /// Cost: preprocessing is more expensive than a single customization but usually far cheaper
    /// than building a full classical CH of the same quality. Construction copies the input
    /// slices; you may drop them afterwards.
    ///
    /// Errors: [`Error::InvalidInput`] if `tail` and `head` differ in length, an arc references a
    /// node `>= order.len()`, or `order` is not a permutation.
    pub fn new(
        order: &[u32],
        tail: &[u32],
        head: &[u32],
        mut log_message: impl FnMut(&str),
        filter_always_inf_arcs: bool,
    ) -> Result<Self> {
        let inner = cch::CCHStructure::new(order, tail, head, &mut log_message, filter_always_inf_arcs)?;
        Ok(CCH { inner })
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn input_arc_count(&self) -> usize {
        self.inner.input_arc_count()
    }

    /// Number of arcs in the index, shortcuts included.
    ///
    /// Every CCH arc stands for an unordered node pair and carries both directions, so input
    /// arcs between the same two nodes (parallel or antiparallel) share one CCH arc and
    /// self-loops get none. The count is at least the number of distinct undirected non-loop
    /// input edges, which for multigraphs can be less than [`CCH::input_arc_count`].
    pub fn cch_arc_count(&self) -> usize {
        self.inner.cch_arc_count()
    }

    /// Parent of `node` in the elimination tree, `None` for roots and unknown nodes.
    pub fn elimination_tree_parent(&self, node: u32) -> Option<u32> {
        let rank = *self.inner.rank.get(node as usize)?;
        self.inner
            .elimination_tree_parent(rank)
            .map(|parent| self.inner.order[parent as usize])
    }

    /// Position of `node` in the order.
    pub fn rank(&self, node: u32) -> Option<u32> {
        self.inner.rank.get(node as usize).copied()
    }

    pub fn order(&self) -> &[u32] {
        &self.inner.order
    }
}

/// Arc weights bound to a [`CCH`] together with the customized weights of all CCH arcs.
#[derive(Clone)]
pub struct CCHMetric<'a> {
    weights: Cow<'a, [Weight]>,
    up: Vec<Weight>,
    down: Vec<Weight>,
    cch: &'a CCH,
}

impl<'a> CCHMetric<'a> {
    fn uncustomized(cch: &'a CCH, weights: Cow<'a, [Weight]>) -> Result<Self> {
        check_weight_count(cch, &weights)?;
        let m = cch.cch_arc_count();
        Ok(CCHMetric {
            weights,
            up: vec![INFINITY; m],
            down: vec![INFINITY; m],
            cch,
        })
    }

    /// Create and customize a metric (weight binding) for a given [`CCH`].
    ///
    /// Owns the weight vector so that future partial updates can mutate it.
    /// `weights[i]` belongs to input arc `i`; [`INFINITY`] removes the arc.
    pub fn new(cch: &'a CCH, weights: Vec<Weight>) -> Result<Self> {
        let mut metric = Self::uncustomized(cch, Cow::Owned(weights))?;
        metric.customize();
        Ok(metric)
    }

    /// Parallel customization variant, see [`CCHMetric::parallel_customize`].
    pub fn parallel_new(cch: &'a CCH, weights: Vec<Weight>, thread_count: u32) -> Result<Self> {
        let mut metric = Self::uncustomized(cch, Cow::Owned(weights))?;
        metric.parallel_customize(thread_count);
        Ok(metric)
    }

    /// Like [`CCHMetric::new`] but borrows the weights. The first mutation through
    /// [`CCHMetric::weights_mut`] or a partial update copies them.
    pub fn from_borrowed(cch: &'a CCH, weights: &'a [Weight]) -> Result<Self> {
        let mut metric = Self::uncustomized(cch, Cow::Borrowed(weights))?;
        metric.customize();
        Ok(metric)
    }

    /// Recompute all CCH arc weights from the input weights.
    pub fn customize(&mut self) {
        customization::customize(&self.cch.inner, &self.weights, &mut self.up, &mut self.down);
    }

    /// Parallel customization; `thread_count == 0` uses the current rayon pool.
    ///
    /// Gives exactly the same weights as [`CCHMetric::customize`].
    pub fn parallel_customize(&mut self, thread_count: u32) {
        customization::parallel_customize(
            &self.cch.inner,
            &self.weights,
            &mut self.up,
            &mut self.down,
            thread_count,
        );
    }

    /// Swap in a complete new set of input weights. Call [`CCHMetric::customize`] afterwards.
    pub fn replace_weights(&mut self, weights: Vec<Weight>) -> Result<()> {
        check_weight_count(self.cch, &weights)?;
        self.weights = Cow::Owned(weights);
        Ok(())
    }

    /// weights slice
    pub fn weights(&self) -> &[Weight] {
        &self.weights
    }

    /// Direct access to the input weights. Changes only take effect after a (partial) customization.
    pub fn weights_mut(&mut self) -> &mut [Weight] {
        self.weights.to_mut()
    }

    /// Customized weights of the CCH arcs, traversed from the lower to the higher ranked endpoint.
    pub fn upward_weights(&self) -> &[Weight] {
        &self.up
    }

    /// Customized weights of the CCH arcs, traversed from the higher to the lower ranked endpoint.
    pub fn downward_weights(&self) -> &[Weight] {
        &self.down
    }

    pub fn cch(&self) -> &'a CCH {
        self.cch
    }

    /// Contract the graph in the order of the [`CCH`] under this metric, keeping only shortcuts
    /// that are actually needed.
    pub fn build_perfect_ch(&self) -> ContractionHierarchy {
        let inner = &self.cch.inner;
        ContractionHierarchy::build_perfect(&inner.order, &inner.input_tail, &inner.input_head, &self.weights)
    }

    /// Total weight of a path of CCH arcs under this metric, e.g. a path found with another metric
    /// of the same [`CCH`].
    pub fn weight_of_cch_arc_path(&self, path: &[CCHArc]) -> Result<Weight> {
        self.check_cch_arcs(path)?;
        Ok(query::weight_of_cch_arc_path(&self.up, &self.down, path))
    }

    /// Input arcs of a path of CCH arcs, unpacked under this metric.
    ///
    /// Errors: [`Error::InvalidInput`] if an arc id is out of range or some arc has no finite
    /// weight under this metric.
    pub fn unpack_cch_arc_path(&self, path: &[CCHArc]) -> Result<Vec<u32>> {
        self.check_cch_arcs(path)?;
        query::unpack_cch_arc_path(&self.cch.inner, &self.weights, &self.up, &self.down, path)
            .ok_or_else(|| error::invalid_input("the path contains an arc of infinite weight"))
    }

    fn check_cch_arcs(&self, path: &[CCHArc]) -> Result<()> {
        let m = self.cch.cch_arc_count();
        if let Some(arc) = path.iter().find(|arc| arc.id as usize >= m) {
            return Err(error::invalid_input(format!(
                "CCH arc {} is out of range, there are {m} arcs",
                arc.id
            )));
        }
        Ok(())
    }
}

fn check_weight_count(cch: &CCH, weights: &[Weight]) -> Result<()> {
    if weights.len() != cch.input_arc_count() {
        return Err(error::invalid_input(format!(
            "expected {} weights, got {}",
            cch.input_arc_count(),
            weights.len()
        )));
    }
    Ok(())
}

/// Recustomize a metric after changing a few of its input weights.
///
/// Mark the changed arcs with [`CCHPartialCustomization::update_arc`], then call
/// [`CCHPartialCustomization::customize`]. Marks stay until [`CCHPartialCustomization::reset`].
pub struct CCHPartialCustomization<'a> {
    inner: customization::PartialCustomization,
    cch: &'a CCH,
}

impl<'a> CCHPartialCustomization<'a> {
    pub fn new(cch: &'a CCH) -> Self {
        CCHPartialCustomization {
            inner: customization::PartialCustomization::new(&cch.inner),
            cch,
        }
    }

    /// Forget all marked arcs.
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Mark input arc `arc` as changed.
    pub fn update_arc(&mut self, arc: u32) -> Result<()> {
        if arc as usize >= self.cch.input_arc_count() {
            return Err(error::invalid_input(format!(
                "arc {arc} is out of range, there are {} arcs",
                self.cch.input_arc_count()
            )));
        }
        self.inner.update_arc(arc);
        Ok(())
    }

    /// Bring the customized weights of `metric` in line with its input weights.
    ///
    /// Errors: [`Error::InvalidState`] if `metric` belongs to a different [`CCH`].
    pub fn customize(&mut self, metric: &mut CCHMetric<'_>) -> Result<()> {
        if !std::ptr::eq(metric.cch, self.cch) {
            return Err(error::invalid_state(
                "partial customization used with a metric of another CCH",
            ));
        }
        self.inner
            .customize(&self.cch.inner, &metric.weights, &mut metric.up, &mut metric.down);
        Ok(())
    }
}

/// Reusable partial customization helper. Construct once if you perform many small incremental
/// weight updates; this avoids reallocating O(m) internal buffers each call.
pub struct CCHMetricPartialUpdater<'a> {
    partial: CCHPartialCustomization<'a>,
    _marker: std::marker::PhantomData<std::cell::Cell<()>>, // Not Sync
}

impl<'a> CCHMetricPartialUpdater<'a> {
    /// Create a reusable partial updater bound to a given CCH. You can then apply it to any
    /// metric built from the same CCH (even if you rebuild metrics with different weight sets).
    pub fn new(cch: &'a CCH) -> Self {
        CCHMetricPartialUpdater {
            partial: CCHPartialCustomization::new(cch),
            _marker: std::marker::PhantomData,
        }
    }

    /// Apply a batch of (arc, new_weight) updates to the given metric and run partial customize.
    ///
    /// Nothing is written if an arc id is out of range or the metric belongs to another CCH.
    pub fn apply<T>(&mut self, metric: &mut CCHMetric<'a>, updates: &T) -> Result<()>
    where
        T: for<'b> std::ops::Index<&'b u32, Output = u32>,
        for<'b> &'b T: IntoIterator<Item = (&'b u32, &'b u32)>,
    {
        if !std::ptr::eq(metric.cch, self.partial.cch) {
            return Err(error::invalid_state(
                "CCHMetricPartialUpdater must be used with metrics from the same CCH",
            ));
        }
        let m = metric.weights.len();
        if let Some((arc, _)) = updates.into_iter().find(|(arc, _)| **arc as usize >= m) {
            return Err(error::invalid_input(format!(
                "arc {arc} is out of range, there are {m} arcs"
            )));
        }

        let weights = metric.weights.to_mut();
        for (k, v) in updates {
            weights[*k as usize] = *v;
        }
        self.partial.reset();
        for (k, _) in updates {
            self.partial.update_arc(*k)?;
        }
        self.partial.customize(metric)
    }
}

pub struct CCHQuery<'a> {
    metric: &'a CCHMetric<'a>,
    setup: QuerySetup,
    search: EliminationTreeQuery,
    distances: Vec<Weight>,
    _marker: std::marker::PhantomData<std::cell::Cell<()>>, // Not Sync
}

impl<'a> CCHQuery<'a> {
    /// Allocate a new reusable shortest-path query bound to a given customized [`CCHMetric`].
    ///
    /// The query object stores its own label buffers and can be reset and reused for
    /// many (s, t) pairs or multi-source / multi-target batches. You may have multiple query
    /// objects referencing the same metric concurrently (read-only access to metric data).
    ///
    /// Thread-safety: `Send` but not `Sync`; do not mutate from multiple threads simultaneously.
    pub fn new(metric: &'a CCHMetric<'a>) -> Self {
        let n = metric.cch.node_count();
        CCHQuery {
            metric,
            setup: QuerySetup::new(n),
            search: EliminationTreeQuery::new(n),
            distances: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Reset internal state (clears sources, targets, pinned sets, results) so the object can be reused.
    pub fn reset(&mut self) {
        self.setup.reset();
    }

    /// Like [`CCHQuery::reset`], and bind the query to another metric of the same [`CCH`].
    pub fn reset_with_metric(&mut self, metric: &'a CCHMetric<'a>) -> Result<()> {
        if !std::ptr::eq(metric.cch, self.metric.cch) {
            return Err(error::invalid_state("query rebound to a metric of another CCH"));
        }
        self.metric = metric;
        self.setup.reset();
        Ok(())
    }

    /// Clear the sources (added and pinned) but keep the targets.
    pub fn reset_source(&mut self) {
        self.setup.reset_source();
    }

    /// Clear the targets (added and pinned) but keep the sources.
    pub fn reset_target(&mut self) {
        self.setup.reset_target();
    }

    /// Add a source node with an initial distance (normally 0). Multiple calls allow a multi-
    /// source query. Distances let you model already-traversed partial paths.
    pub fn add_source(&mut self, s: u32, dist: Weight) -> Result<()> {
        self.setup.add_source(s, dist)
    }

    /// Add a target node with an initial distance (normally 0). Multiple calls allow multi-target
    /// queries; the result is the best combination of any source and any target.
    pub fn add_target(&mut self, t: u32, dist: Weight) -> Result<()> {
        self.setup.add_target(t, dist)
    }

    /// Fix the sources of [`CCHQuery::run_to_pinned_sources`].
    pub fn pin_sources(&mut self, sources: &[u32]) -> Result<()> {
        self.setup.pin_sources(sources)
    }

    /// Fix the targets of [`CCHQuery::run_to_pinned_targets`].
    pub fn pin_targets(&mut self, targets: &[u32]) -> Result<()> {
        self.setup.pin_targets(targets)
    }

    /// Execute the forward/backward elimination tree searches to settle the shortest path between the
    /// added sources and targets. Must be called after at least one source and one target.
    pub fn run(&mut self) -> Result<()> {
        self.setup.check_point_to_point()?;
        let metric = self.metric;
        self.search.run(
            &metric.cch.inner,
            &metric.up,
            &metric.down,
            &self.setup.sources,
            &self.setup.targets,
        );
        self.setup.ran = Some(RunKind::PointToPoint);
        Ok(())
    }

    /// Distances from the sources to every pinned target.
    ///
    /// With pinned sources the result is a row-major `pinned sources × pinned targets` table,
    /// otherwise all added sources form one frontier and there is one value per pinned target.
    pub fn run_to_pinned_targets(&mut self) -> Result<()> {
        let (rows, columns) = self.setup.to_pinned_targets()?;
        let metric = self.metric;
        self.distances.clear();
        self.distances.resize(rows.len() * columns.len(), INFINITY);
        self.search.many_to_many(
            &metric.cch.inner,
            &metric.up,
            &metric.down,
            &rows,
            &columns,
            &mut self.distances,
        );
        self.setup.ran = Some(RunKind::ToPinnedTargets);
        Ok(())
    }

    /// Distances from every pinned source to the targets, the mirror of
    /// [`CCHQuery::run_to_pinned_targets`]: one row per pinned target (or one row for all added targets).
    pub fn run_to_pinned_sources(&mut self) -> Result<()> {
        let (rows, columns) = self.setup.to_pinned_sources()?;
        let metric = self.metric;
        self.distances.clear();
        self.distances.resize(rows.len() * columns.len(), INFINITY);
        self.search.many_to_many(
            &metric.cch.inner,
            &metric.down,
            &metric.up,
            &rows,
            &columns,
            &mut self.distances,
        );
        self.setup.ran = Some(RunKind::ToPinnedSources);
        Ok(())
    }

    /// Return the shortest path distance after [`CCHQuery::run`].
    ///
    /// Returns `None` if no target is reachable.
    pub fn distance(&self) -> Result<Option<Weight>> {
        self.setup.require(RunKind::PointToPoint, "distance")?;
        let distance = self.search.distance();
        Ok((distance != INFINITY).then_some(distance))
    }

    /// Reconstruct and return the node id sequence of the current best path.
    ///
    /// Returns an empty vec if no target is reachable, `[s]` if a source is also a target.
    pub fn node_path(&self) -> Result<Vec<u32>> {
        let arcs = self.arc_path()?;
        Ok(match self.search.path_source(&self.metric.cch.inner) {
            Some(source) => query::node_path(source, &arcs, &self.metric.cch.inner.input_head),
            None => Vec::new(),
        })
    }

    /// Reconstruct and return the original arc ids along the shortest path (after unpacking
    /// shortcuts). Useful if you need per-arc attributes (speed limits, geometry). Order matches
    /// the traversal direction from a chosen source to target.
    ///
    /// Returns empty vec if no target is reachable.
    pub fn arc_path(&self) -> Result<Vec<u32>> {
        let path = self.cch_arc_path()?;
        let metric = self.metric;
        query::unpack_cch_arc_path(&metric.cch.inner, &metric.weights, &metric.up, &metric.down, &path)
            .ok_or_else(|| error::invalid_state("the metric changed since the query was run"))
    }

    /// The shortest path as CCH arcs, before unpacking. Can be evaluated or unpacked under
    /// another metric of the same [`CCH`].
    pub fn cch_arc_path(&self) -> Result<Vec<CCHArc>> {
        self.setup.require(RunKind::PointToPoint, "path")?;
        Ok(self.search.cch_arc_path(&self.metric.cch.inner))
    }

    pub fn distances_to_targets(&self) -> Result<Vec<Weight>> {
        self.setup.require(RunKind::ToPinnedTargets, "distances to targets")?;
        Ok(self.distances.clone())
    }

    /// Copy the distances to the pinned targets into `out`, which must have exactly the right length.
    pub fn distances_to_targets_into(&self, out: &mut [Weight]) -> Result<()> {
        self.setup.require(RunKind::ToPinnedTargets, "distances to targets")?;
        query::copy_into(&self.distances, out)
    }

    pub fn distances_to_sources(&self) -> Result<Vec<Weight>> {
        self.setup.require(RunKind::ToPinnedSources, "distances to sources")?;
        Ok(self.distances.clone())
    }

    pub fn distances_to_sources_into(&self, out: &mut [Weight]) -> Result<()> {
        self.setup.require(RunKind::ToPinnedSources, "distances to sources")?;
        query::copy_into(&self.distances, out)
    }

    /// Distances from `source` to each of `targets` with one upward search and a downward sweep
    /// over all nodes. Worth it when `targets` is a sizeable part of the graph.
    ///
    /// Leaves sources and targets alone but discards the result of the last run.
    pub fn phast_to_targets(&mut self, source: u32, targets: &[u32]) -> Result<Vec<Weight>> {
        let cch = &self.metric.cch.inner;
        let n = cch.node_count();
        if let Some(&node) = std::iter::once(&source).chain(targets).find(|&&node| node as usize >= n) {
            return Err(error::invalid_input(format!(
                "node {node} is out of range, there are {n} nodes"
            )));
        }
        self.setup.ran = None;
        let all = self.search.phast(cch, &self.metric.up, &self.metric.down, source);
        Ok(targets.iter().map(|&t| all[cch.rank[t as usize] as usize]).collect())
    }

    pub fn metric(&self) -> &'a CCHMetric<'a> {
        self.metric
    }
}
