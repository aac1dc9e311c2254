//! Elimination tree queries on a customized CCH and the bookkeeping shared by all query types.
//!
//! The search space of a node in a CCH is exactly its path to the root of the elimination tree,
//! so no priority queue is needed: nodes are scanned by ascending rank and every upward arc is relaxed once.

use crate::cch::{CCHStructure, INVALID_ID};
use crate::customization::link;
use crate::error::{Result, invalid_input, invalid_state};
use crate::{INFINITY, Weight};

/// A CCH arc together with the direction it is traversed in.
///
/// `upward` means from the lower ranked to the higher ranked endpoint. Paths made of these can be
/// stored and later evaluated or unpacked under any metric of the same CCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CCHArc {
    pub id: u32,
    pub upward: bool,
}

/// Labels of one direction of an elimination tree search.
#[derive(Debug, Clone)]
pub(crate) struct SearchSpace {
    pub dist: Vec<Weight>,
    pub pred: Vec<u32>,
    seen: Vec<bool>,
    // ranks of all nodes reachable in the tree from some root
    pub nodes: Vec<u32>,
}

impl SearchSpace {
    pub fn new(node_count: usize) -> Self {
        SearchSpace {
            dist: vec![INFINITY; node_count],
            pred: vec![INVALID_ID; node_count],
            seen: vec![false; node_count],
            nodes: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        for &r in &self.nodes {
            self.dist[r as usize] = INFINITY;
            self.pred[r as usize] = INVALID_ID;
            self.seen[r as usize] = false;
        }
        self.nodes.clear();
    }

    pub fn add_root(&mut self, cch: &CCHStructure, root: u32, dist: Weight) {
        self.dist[root as usize] = self.dist[root as usize].min(dist);
        let mut current = Some(root);
        while let Some(r) = current {
            if std::mem::replace(&mut self.seen[r as usize], true) {
                break;
            }
            self.nodes.push(r);
            current = cch.elimination_tree_parent(r);
        }
    }

    pub fn relax(&mut self, cch: &CCHStructure, weights: &[Weight]) {
        self.nodes.sort_unstable();
        for &r in &self.nodes {
            let d = self.dist[r as usize];
            if d == INFINITY {
                continue;
            }
            for arc in cch.up_arcs(r) {
                let next = cch.head[arc] as usize;
                let candidate = link(d, weights[arc]);
                if candidate < self.dist[next] {
                    self.dist[next] = candidate;
                    self.pred[next] = arc as u32;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BucketEntry {
    pub node: u32,
    pub slot: u32,
    pub dist: Weight,
}

/// Distances from (or to) every pinned node, stored at each node of its search space.
#[derive(Debug, Clone, Default)]
pub(crate) struct Buckets {
    entries: Vec<BucketEntry>,
}

impl Buckets {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn push(&mut self, node: u32, slot: u32, dist: Weight) {
        self.entries.push(BucketEntry { node, slot, dist });
    }

    pub fn seal(&mut self) {
        self.entries.sort_unstable();
    }

    pub fn at(&self, node: u32) -> &[BucketEntry] {
        let begin = self.entries.partition_point(|entry| entry.node < node);
        let end = self.entries.partition_point(|entry| entry.node <= node);
        &self.entries[begin..end]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Search state of a CCH query, reused across runs.
#[derive(Debug, Clone)]
pub(crate) struct EliminationTreeQuery {
    forward: SearchSpace,
    backward: SearchSpace,
    meeting: u32,
    distance: Weight,
    buckets: Buckets,
    all_distances: Vec<Weight>,
}

impl EliminationTreeQuery {
    pub fn new(node_count: usize) -> Self {
        EliminationTreeQuery {
            forward: SearchSpace::new(node_count),
            backward: SearchSpace::new(node_count),
            meeting: INVALID_ID,
            distance: INFINITY,
            buckets: Buckets::default(),
            all_distances: Vec::new(),
        }
    }

    /// One-to-one search between all `sources` and all `targets`, given as `(node, initial distance)`.
    pub fn run(&mut self, cch: &CCHStructure, up: &[Weight], down: &[Weight], sources: &[(u32, Weight)], targets: &[(u32, Weight)]) {
        self.forward.clear();
        self.backward.clear();
        for &(node, dist) in sources {
            self.forward.add_root(cch, cch.rank[node as usize], dist);
        }
        for &(node, dist) in targets {
            self.backward.add_root(cch, cch.rank[node as usize], dist);
        }
        self.forward.relax(cch, up);
        self.backward.relax(cch, down);

        self.meeting = INVALID_ID;
        self.distance = INFINITY;
        // ascending ranks, the lowest meeting node wins ties
        for &r in &self.forward.nodes {
            let candidate = link(self.forward.dist[r as usize], self.backward.dist[r as usize]);
            if candidate < self.distance {
                self.distance = candidate;
                self.meeting = r;
            }
        }
        log::trace!(
            "elimination tree query: {} forward, {} backward nodes, distance {}",
            self.forward.nodes.len(),
            self.backward.nodes.len(),
            self.distance
        );
    }

    pub fn distance(&self) -> Weight {
        self.distance
    }

    /// The shortest path as CCH arcs, from the source side to the target side. Empty if unreachable.
    pub fn cch_arc_path(&self, cch: &CCHStructure) -> Vec<CCHArc> {
        if self.meeting == INVALID_ID {
            return Vec::new();
        }
        let mut path = Vec::new();
        let mut current = self.meeting;
        while self.forward.pred[current as usize] != INVALID_ID {
            let arc = self.forward.pred[current as usize];
            path.push(CCHArc { id: arc, upward: true });
            current = cch.tail[arc as usize];
        }
        path.reverse();

        let mut current = self.meeting;
        while self.backward.pred[current as usize] != INVALID_ID {
            let arc = self.backward.pred[current as usize];
            path.push(CCHArc { id: arc, upward: false });
            current = cch.tail[arc as usize];
        }
        path
    }

    /// The node the shortest path starts at, `None` if unreachable.
    pub fn path_source(&self, cch: &CCHStructure) -> Option<u32> {
        if self.meeting == INVALID_ID {
            return None;
        }
        let mut current = self.meeting;
        while self.forward.pred[current as usize] != INVALID_ID {
            current = cch.tail[self.forward.pred[current as usize] as usize];
        }
        Some(cch.order[current as usize])
    }

    /// Many-to-many distances with buckets.
    ///
    /// Every column node gets a search with `column_weights`, its labels are stored in buckets.
    /// Every row (a group of roots searched together) then scans its search space with `row_weights`.
    /// `out` is filled row-major and must hold `rows.len() * columns.len()` values.
    pub fn many_to_many(
        &mut self,
        cch: &CCHStructure,
        row_weights: &[Weight],
        column_weights: &[Weight],
        rows: &[Vec<(u32, Weight)>],
        columns: &[u32],
        out: &mut [Weight],
    ) {
        debug_assert_eq!(out.len(), rows.len() * columns.len());
        out.fill(INFINITY);
        if rows.is_empty() || columns.is_empty() {
            return;
        }

        let (row_space, column_space) = (&mut self.forward, &mut self.backward);
        self.buckets.clear();
        for (slot, &node) in columns.iter().enumerate() {
            column_space.clear();
            column_space.add_root(cch, cch.rank[node as usize], 0);
            column_space.relax(cch, column_weights);
            for &r in &column_space.nodes {
                let dist = column_space.dist[r as usize];
                if dist != INFINITY {
                    self.buckets.push(r, slot as u32, dist);
                }
            }
        }
        column_space.clear();
        self.buckets.seal();

        for (row, roots) in rows.iter().enumerate() {
            let row_out = &mut out[row * columns.len()..(row + 1) * columns.len()];
            row_space.clear();
            for &(node, dist) in roots {
                row_space.add_root(cch, cch.rank[node as usize], dist);
            }
            row_space.relax(cch, row_weights);
            for &r in &row_space.nodes {
                let dist = row_space.dist[r as usize];
                if dist == INFINITY {
                    continue;
                }
                for entry in self.buckets.at(r) {
                    let slot = &mut row_out[entry.slot as usize];
                    *slot = (*slot).min(link(dist, entry.dist));
                }
            }
        }
        row_space.clear();

        // the point to point labels are gone
        self.meeting = INVALID_ID;
        self.distance = INFINITY;
        log::trace!(
            "many to many: {} x {} with {} bucket entries",
            rows.len(),
            columns.len(),
            self.buckets.len()
        );
    }

    /// Distances from `source` to every node, indexed by rank: an upward search followed by a
    /// downward sweep over all ranks.
    pub fn phast(&mut self, cch: &CCHStructure, up: &[Weight], down: &[Weight], source: u32) -> &[Weight] {
        let n = cch.node_count();
        self.all_distances.clear();
        self.all_distances.resize(n, INFINITY);

        self.forward.clear();
        self.forward.add_root(cch, cch.rank[source as usize], 0);
        self.forward.relax(cch, up);
        for &r in &self.forward.nodes {
            self.all_distances[r as usize] = self.forward.dist[r as usize];
        }
        self.forward.clear();
        self.meeting = INVALID_ID;
        self.distance = INFINITY;

        for r in (0..n as u32).rev() {
            let mut best = self.all_distances[r as usize];
            for arc in cch.up_arcs(r) {
                best = best.min(link(self.all_distances[cch.head[arc] as usize], down[arc]));
            }
            self.all_distances[r as usize] = best;
        }
        &self.all_distances
    }
}

/// Expand a path of CCH arcs into input arcs, using the weights of one customized metric.
///
/// A CCH arc is replaced by an input arc of the same weight if there is one (the lowest such id),
/// otherwise by the lower triangle with the lowest middle node whose two arcs add up to its weight.
/// Returns `None` if some arc is infinite under these weights.
pub(crate) fn unpack_cch_arc_path(
    cch: &CCHStructure,
    input: &[Weight],
    up: &[Weight],
    down: &[Weight],
    path: &[CCHArc],
) -> Option<Vec<u32>> {
    let mut arcs = Vec::new();
    let mut stack = Vec::new();
    for &arc in path {
        stack.push(arc);
        while let Some(CCHArc { id, upward }) = stack.pop() {
            let id = id as usize;
            let weight = if upward { up[id] } else { down[id] };
            if weight == INFINITY {
                return None;
            }

            let inputs = if upward { cch.up_inputs(id) } else { cch.down_inputs(id) };
            if let Some(&input_arc) = inputs.iter().find(|&&input_arc| input[input_arc as usize] == weight) {
                arcs.push(input_arc);
                continue;
            }

            let triangle = cch.lower_triangles(id).iter().find(|triangle| {
                let (first, second) = (triangle.first as usize, triangle.second as usize);
                if upward {
                    link(down[first], up[second]) == weight
                } else {
                    link(down[second], up[first]) == weight
                }
            })?;
            // pushed in reverse, the part next to the tail of the traversal comes out first
            if upward {
                stack.push(CCHArc { id: triangle.second, upward: true });
                stack.push(CCHArc { id: triangle.first, upward: false });
            } else {
                stack.push(CCHArc { id: triangle.first, upward: true });
                stack.push(CCHArc { id: triangle.second, upward: false });
            }
        }
    }
    Some(arcs)
}

/// Weight of a path of CCH arcs under a customized metric, saturating at [`INFINITY`].
pub(crate) fn weight_of_cch_arc_path(up: &[Weight], down: &[Weight], path: &[CCHArc]) -> Weight {
    path.iter().fold(0, |sum, arc| {
        let weight = if arc.upward { up[arc.id as usize] } else { down[arc.id as usize] };
        link(sum, weight)
    })
}

/// Node sequence of a path given by its first node and its input arcs.
pub(crate) fn node_path(source: u32, arc_path: &[u32], input_head: &[u32]) -> Vec<u32> {
    let mut nodes = Vec::with_capacity(arc_path.len() + 1);
    nodes.push(source);
    nodes.extend(arc_path.iter().map(|&arc| input_head[arc as usize]));
    nodes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunKind {
    PointToPoint,
    ToPinnedTargets,
    ToPinnedSources,
}

/// Sources, targets and pinned sets of a query plus which kind of run produced the current result.
#[derive(Debug, Clone)]
pub(crate) struct QuerySetup {
    node_count: usize,
    pub sources: Vec<(u32, Weight)>,
    pub targets: Vec<(u32, Weight)>,
    pub pinned_sources: Option<Vec<u32>>,
    pub pinned_targets: Option<Vec<u32>>,
    pub ran: Option<RunKind>,
}

impl QuerySetup {
    pub fn new(node_count: usize) -> Self {
        QuerySetup {
            node_count,
            sources: Vec::new(),
            targets: Vec::new(),
            pinned_sources: None,
            pinned_targets: None,
            ran: None,
        }
    }

    pub fn reset(&mut self) {
        self.reset_source();
        self.reset_target();
    }

    pub fn reset_source(&mut self) {
        self.sources.clear();
        self.pinned_sources = None;
        self.ran = None;
    }

    pub fn reset_target(&mut self) {
        self.targets.clear();
        self.pinned_targets = None;
        self.ran = None;
    }

    fn check_node(&self, node: u32) -> Result<()> {
        if node as usize >= self.node_count {
            return Err(invalid_input(format!(
                "node {node} is out of range, there are {} nodes",
                self.node_count
            )));
        }
        Ok(())
    }

    fn check_endpoint(&self, node: u32, dist: Weight) -> Result<()> {
        self.check_node(node)?;
        if dist == INFINITY {
            return Err(invalid_input(format!("initial distance of node {node} is infinite")));
        }
        Ok(())
    }

    pub fn add_source(&mut self, node: u32, dist: Weight) -> Result<()> {
        self.check_endpoint(node, dist)?;
        self.sources.push((node, dist));
        self.ran = None;
        Ok(())
    }

    pub fn add_target(&mut self, node: u32, dist: Weight) -> Result<()> {
        self.check_endpoint(node, dist)?;
        self.targets.push((node, dist));
        self.ran = None;
        Ok(())
    }

    pub fn pin_sources(&mut self, nodes: &[u32]) -> Result<()> {
        nodes.iter().try_for_each(|&node| self.check_node(node))?;
        self.pinned_sources = Some(nodes.to_vec());
        self.ran = None;
        Ok(())
    }

    pub fn pin_targets(&mut self, nodes: &[u32]) -> Result<()> {
        nodes.iter().try_for_each(|&node| self.check_node(node))?;
        self.pinned_targets = Some(nodes.to_vec());
        self.ran = None;
        Ok(())
    }

    pub fn check_point_to_point(&self) -> Result<()> {
        if self.sources.is_empty() || self.targets.is_empty() {
            return Err(invalid_state("run needs at least one source and one target"));
        }
        Ok(())
    }

    /// Rows and columns of a run towards the pinned targets: one row per pinned source,
    /// or a single row with all added sources.
    pub fn to_pinned_targets(&self) -> Result<(Vec<Vec<(u32, Weight)>>, Vec<u32>)> {
        let columns = self
            .pinned_targets
            .clone()
            .ok_or_else(|| invalid_state("no targets pinned"))?;
        Ok((rows(self.pinned_sources.as_deref(), &self.sources, "sources")?, columns))
    }

    /// Mirror of [`QuerySetup::to_pinned_targets`], rows are targets.
    pub fn to_pinned_sources(&self) -> Result<(Vec<Vec<(u32, Weight)>>, Vec<u32>)> {
        let columns = self
            .pinned_sources
            .clone()
            .ok_or_else(|| invalid_state("no sources pinned"))?;
        Ok((rows(self.pinned_targets.as_deref(), &self.targets, "targets")?, columns))
    }

    pub fn require(&self, kind: RunKind, what: &str) -> Result<()> {
        match self.ran {
            Some(ran) if ran == kind => Ok(()),
            Some(ran) => Err(invalid_state(format!("{what} is not available after a {ran:?} run"))),
            None => Err(invalid_state(format!("{what} requested before the query was run"))),
        }
    }
}

fn rows(pinned: Option<&[u32]>, added: &[(u32, Weight)], what: &str) -> Result<Vec<Vec<(u32, Weight)>>> {
    match pinned {
        Some(pinned) => Ok(pinned.iter().map(|&node| vec![(node, 0)]).collect()),
        None if !added.is_empty() => Ok(vec![added.to_vec()]),
        None => Err(invalid_state(format!("no {what} added or pinned"))),
    }
}

/// Copy a many-to-many result into a caller buffer of exactly the right length.
pub(crate) fn copy_into(result: &[Weight], out: &mut [Weight]) -> Result<()> {
    if out.len() != result.len() {
        return Err(invalid_input(format!(
            "buffer holds {} values, the result has {}",
            out.len(),
            result.len()
        )));
    }
    out.copy_from_slice(result);
    Ok(())
}
