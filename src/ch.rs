//! Classical contraction hierarchies.
//!
//! Nodes are contracted one by one, cheapest first, and shortcuts are inserted whenever a local witness
//! search can not prove that a path over the contracted node is dispensable. The result is split into an
//! upward forward graph and an upward backward graph, so queries are two upward Dijkstra searches.

use crate::customization::link;
use crate::error::{Result, check_arcs, invalid_input};
use crate::query::{Buckets, QuerySetup, RunKind, copy_into, node_path};
use crate::{INFINITY, Weight};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::time::Instant;

/// Pops per witness search when `max_pop_count == 0` is passed to [`ContractionHierarchy::build`].
pub const DEFAULT_MAX_POP_COUNT: u32 = 500;

const FILE_MAGIC: [u8; 8] = *b"ROADCCH\0";
const FILE_VERSION: u32 = 1;

const INVALID_ID: u32 = u32::MAX;

/// How to turn a CH arc back into input arcs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Unpack {
    Input(u32),
    /// Traversing the arc means traversing backward arc `down` from its head to its tail
    /// and then forward arc `up` from its tail to its head.
    Shortcut { down: u32, up: u32 },
}

/// Arcs from lower to higher ranks, grouped by the lower endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct UpwardGraph {
    first_out: Vec<u32>,
    tail: Vec<u32>,
    head: Vec<u32>,
    weight: Vec<Weight>,
    unpack: Vec<Unpack>,
}

impl UpwardGraph {
    fn arcs(&self, r: u32) -> std::ops::Range<usize> {
        self.first_out[r as usize] as usize..self.first_out[r as usize + 1] as usize
    }

    fn arc_to(&self, r: u32, head: u32) -> Option<u32> {
        let arcs = self.arcs(r);
        self.head[arcs.clone()]
            .binary_search(&head)
            .ok()
            .map(|offset| (arcs.start + offset) as u32)
    }

    fn is_consistent(&self, node_count: usize, input_arc_count: usize, forward_arc_count: usize, backward_arc_count: usize) -> bool {
        let m = self.head.len();
        self.first_out.len() == node_count + 1
            && self.first_out.first() == Some(&0)
            && self.first_out.last() == Some(&(m as u32))
            && self.first_out.windows(2).all(|w| w[0] <= w[1])
            && self.tail.len() == m
            && self.weight.len() == m
            && self.unpack.len() == m
            && (0..node_count as u32).all(|r| {
                self.arcs(r)
                    .all(|arc| self.tail[arc] == r && self.head[arc] > r && (self.head[arc] as usize) < node_count)
            })
            && self.unpack.iter().all(|unpack| match *unpack {
                Unpack::Input(arc) => (arc as usize) < input_arc_count,
                Unpack::Shortcut { down, up } => (down as usize) < backward_arc_count && (up as usize) < forward_arc_count,
            })
    }
}

/// A node ordered contraction hierarchy with its own arcs and unpacking information.
///
/// Built once from a graph and its weights, it answers queries without further customization.
/// It can be persisted with [`ContractionHierarchy::save_file`] and read back with
/// [`ContractionHierarchy::load_file`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractionHierarchy {
    order: Vec<u32>,
    rank: Vec<u32>,
    input_tail: Vec<u32>,
    input_head: Vec<u32>,
    forward: UpwardGraph,
    backward: UpwardGraph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Input(u32),
    Via(u32),
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    node: u32,
    weight: Weight,
    origin: Origin,
}

// During contraction, nodes know their remaining neighbors in both directions.
#[derive(Debug, Default)]
struct Node {
    outgoing: Vec<Edge>,
    incoming: Vec<Edge>,
}

fn insert_or_decrease(edges: &mut Vec<Edge>, node: u32, weight: Weight, origin: Origin) {
    for edge in edges.iter_mut() {
        if edge.node == node {
            if weight < edge.weight {
                edge.weight = weight;
                edge.origin = origin;
            }
            return;
        }
    }
    edges.push(Edge { node, weight, origin });
}

// Bounded Dijkstra over the not yet contracted graph.
#[derive(Debug)]
struct WitnessSearch {
    dist: Vec<Weight>,
    touched: Vec<u32>,
    heap: BinaryHeap<Reverse<(Weight, u32)>>,
}

impl WitnessSearch {
    fn new(n: usize) -> Self {
        WitnessSearch {
            dist: vec![INFINITY; n],
            touched: Vec::new(),
            heap: BinaryHeap::new(),
        }
    }

    fn run(&mut self, nodes: &[Node], source: u32, excluded: u32, limit: Weight, max_pop_count: usize) {
        for &node in &self.touched {
            self.dist[node as usize] = INFINITY;
        }
        self.touched.clear();
        self.heap.clear();

        self.dist[source as usize] = 0;
        self.touched.push(source);
        self.heap.push(Reverse((0, source)));

        let mut pops = 0;
        while let Some(Reverse((dist, node))) = self.heap.pop() {
            if dist > self.dist[node as usize] {
                continue;
            }
            if dist > limit || pops >= max_pop_count {
                break;
            }
            pops += 1;
            for edge in &nodes[node as usize].outgoing {
                if edge.node == excluded {
                    continue;
                }
                let next = link(dist, edge.weight);
                if next < self.dist[edge.node as usize] {
                    if self.dist[edge.node as usize] == INFINITY {
                        self.touched.push(edge.node);
                    }
                    self.dist[edge.node as usize] = next;
                    self.heap.push(Reverse((next, edge.node)));
                }
            }
        }
    }
}

struct Contractor {
    nodes: Vec<Node>,
    finished: Vec<Node>,
    witness: WitnessSearch,
    max_pop_count: usize,
}

impl Contractor {
    fn new(n: usize, tail: &[u32], head: &[u32], weight: &[Weight], max_pop_count: usize) -> Self {
        let mut nodes: Vec<Node> = (0..n).map(|_| Node::default()).collect();
        for (arc, ((&u, &v), &w)) in tail.iter().zip(head).zip(weight).enumerate() {
            if u == v || w == INFINITY {
                continue;
            }
            let origin = Origin::Input(arc as u32);
            insert_or_decrease(&mut nodes[u as usize].outgoing, v, w, origin);
            insert_or_decrease(&mut nodes[v as usize].incoming, u, w, origin);
        }
        Contractor {
            nodes,
            finished: (0..n).map(|_| Node::default()).collect(),
            witness: WitnessSearch::new(n),
            max_pop_count,
        }
    }

    // Shortcuts `(from, to, weight)` needed when `node` is contracted now.
    fn shortcuts(&mut self, node: u32) -> Vec<(u32, u32, Weight)> {
        let Contractor {
            nodes,
            witness,
            max_pop_count,
            ..
        } = self;
        let nodes: &[Node] = nodes;
        let current = &nodes[node as usize];
        let max_out = current.outgoing.iter().map(|edge| edge.weight).max().unwrap_or(0);

        let mut shortcuts = Vec::new();
        for incoming in &current.incoming {
            if current.outgoing.iter().all(|outgoing| outgoing.node == incoming.node) {
                continue;
            }
            witness.run(nodes, incoming.node, node, link(incoming.weight, max_out), *max_pop_count);
            for outgoing in &current.outgoing {
                if outgoing.node == incoming.node {
                    continue;
                }
                let via = link(incoming.weight, outgoing.weight);
                if witness.dist[outgoing.node as usize] > via {
                    shortcuts.push((incoming.node, outgoing.node, via));
                }
            }
        }
        shortcuts
    }

    fn edge_difference(&mut self, node: u32) -> i64 {
        let removed = self.nodes[node as usize].outgoing.len() + self.nodes[node as usize].incoming.len();
        self.shortcuts(node).len() as i64 - removed as i64
    }

    // Contract `node` and return its former neighbors, sorted and without duplicates.
    fn contract(&mut self, node: u32) -> (usize, Vec<u32>) {
        let shortcuts = self.shortcuts(node);
        let current = std::mem::take(&mut self.nodes[node as usize]);

        for incoming in &current.incoming {
            self.nodes[incoming.node as usize].outgoing.retain(|edge| edge.node != node);
        }
        for outgoing in &current.outgoing {
            self.nodes[outgoing.node as usize].incoming.retain(|edge| edge.node != node);
        }
        for &(from, to, weight) in &shortcuts {
            insert_or_decrease(&mut self.nodes[from as usize].outgoing, to, weight, Origin::Via(node));
            insert_or_decrease(&mut self.nodes[to as usize].incoming, from, weight, Origin::Via(node));
        }

        let mut neighbors: Vec<u32> = current
            .incoming
            .iter()
            .chain(&current.outgoing)
            .map(|edge| edge.node)
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();

        self.finished[node as usize] = current;
        (shortcuts.len(), neighbors)
    }

    // Contract by online priority: 2 * edge difference + contracted neighbors + level.
    fn contract_by_priority(&mut self, log_message: &mut dyn FnMut(&str)) -> Vec<u32> {
        let n = self.nodes.len();
        let mut contracted_neighbors = vec![0i64; n];
        let mut level = vec![0i64; n];
        let mut priority: Vec<i64> = (0..n as u32).map(|node| 2 * self.edge_difference(node)).collect();
        let mut queue: BinaryHeap<Reverse<(i64, u32)>> = (0..n as u32)
            .map(|node| Reverse((priority[node as usize], node)))
            .collect();
        let mut contracted = vec![false; n];

        let mut order = Vec::with_capacity(n);
        let mut shortcut_count = 0;
        let start = Instant::now();
        while let Some(Reverse((prio, node))) = queue.pop() {
            if contracted[node as usize] || prio != priority[node as usize] {
                continue;
            }
            // lazy update, the neighborhood may have changed since the priority was computed
            let fresh = 2 * self.edge_difference(node) + contracted_neighbors[node as usize] + level[node as usize];
            if fresh != prio {
                priority[node as usize] = fresh;
                queue.push(Reverse((fresh, node)));
                continue;
            }

            let (shortcuts, neighbors) = self.contract(node);
            shortcut_count += shortcuts;
            contracted[node as usize] = true;
            order.push(node);

            for neighbor in neighbors {
                let idx = neighbor as usize;
                contracted_neighbors[idx] += 1;
                level[idx] = level[idx].max(level[node as usize] + 1);
                priority[idx] = 2 * self.edge_difference(neighbor) + contracted_neighbors[idx] + level[idx];
                queue.push(Reverse((priority[idx], neighbor)));
            }

            if order.len() % 100_000 == 0 {
                log_message(&format!(
                    "Contracted {} of {n} nodes, {shortcut_count} shortcuts so far. Needed {}ms",
                    order.len(),
                    start.elapsed().as_millis()
                ));
            }
        }
        log_message(&format!(
            "Contraction inserted {shortcut_count} shortcuts. Needed {}ms",
            start.elapsed().as_millis()
        ));
        order
    }

    fn contract_in_order(&mut self, order: &[u32]) {
        let mut shortcut_count = 0;
        for &node in order {
            shortcut_count += self.contract(node).0;
        }
        log::debug!("contraction in fixed order inserted {shortcut_count} shortcuts");
    }

    fn into_hierarchy(self, order: Vec<u32>, tail: &[u32], head: &[u32]) -> ContractionHierarchy {
        let n = order.len();
        let mut rank = vec![0u32; n];
        for (r, &node) in order.iter().enumerate() {
            rank[node as usize] = r as u32;
        }

        // heads first, the unpacking data refers to arcs of lower nodes by position
        let sorted_edges = |outgoing: bool| -> Vec<Vec<Edge>> {
            order
                .iter()
                .map(|&node| {
                    let finished = &self.finished[node as usize];
                    let mut edges = if outgoing {
                        finished.outgoing.clone()
                    } else {
                        finished.incoming.clone()
                    };
                    edges.sort_unstable_by_key(|edge| rank[edge.node as usize]);
                    edges
                })
                .collect()
        };
        let forward_edges = sorted_edges(true);
        let backward_edges = sorted_edges(false);

        let mut forward = skeleton(&forward_edges, &rank);
        let mut backward = skeleton(&backward_edges, &rank);

        // traversing from `a` to `b` over `middle`: down to the middle, then up
        let resolve = |forward: &UpwardGraph, backward: &UpwardGraph, origin: Origin, a: u32, b: u32| match origin {
            Origin::Input(arc) => Unpack::Input(arc),
            Origin::Via(middle) => {
                let middle = rank[middle as usize];
                let down = backward.arc_to(middle, a);
                let up = forward.arc_to(middle, b);
                debug_assert!(down.is_some() && up.is_some());
                Unpack::Shortcut {
                    down: down.unwrap_or(INVALID_ID),
                    up: up.unwrap_or(INVALID_ID),
                }
            }
        };

        let mut forward_unpack = Vec::with_capacity(forward.head.len());
        let mut backward_unpack = Vec::with_capacity(backward.head.len());
        for (r, edges) in forward_edges.iter().enumerate() {
            for edge in edges {
                forward_unpack.push(resolve(&forward, &backward, edge.origin, r as u32, rank[edge.node as usize]));
            }
        }
        for (r, edges) in backward_edges.iter().enumerate() {
            for edge in edges {
                backward_unpack.push(resolve(&forward, &backward, edge.origin, rank[edge.node as usize], r as u32));
            }
        }
        forward.unpack = forward_unpack;
        backward.unpack = backward_unpack;

        ContractionHierarchy {
            order,
            rank,
            input_tail: tail.to_vec(),
            input_head: head.to_vec(),
            forward,
            backward,
        }
    }
}

fn skeleton(edges: &[Vec<Edge>], rank: &[u32]) -> UpwardGraph {
    let mut first_out = Vec::with_capacity(edges.len() + 1);
    first_out.push(0u32);
    let (mut tail, mut head, mut weight) = (Vec::new(), Vec::new(), Vec::new());
    for (r, list) in edges.iter().enumerate() {
        for edge in list {
            tail.push(r as u32);
            head.push(rank[edge.node as usize]);
            weight.push(edge.weight);
        }
        first_out.push(head.len() as u32);
    }
    UpwardGraph {
        first_out,
        tail,
        head,
        weight,
        unpack: Vec::new(),
    }
}

fn to_io_error(err: bincode::Error) -> std::io::Error {
    match *err {
        bincode::ErrorKind::Io(err) => err,
        other => std::io::Error::new(ErrorKind::InvalidData, other.to_string()),
    }
}

impl ContractionHierarchy {
    /// Build a contraction hierarchy, choosing the order on the fly.
    ///
    /// * `tail`, `head`, `weight` – the arcs, arc `i` goes from `tail[i]` to `head[i]`. Arcs of weight
    ///   [`INFINITY`] and loops are ignored.
    /// * `log_message` – receives progress messages.
    /// * `max_pop_count` – bound for every witness search, `0` means [`DEFAULT_MAX_POP_COUNT`]. Larger values
    ///   make preprocessing slower and the hierarchy smaller.
    pub fn build(
        node_count: u32,
        tail: &[u32],
        head: &[u32],
        weight: &[Weight],
        mut log_message: impl FnMut(&str),
        max_pop_count: u32,
    ) -> Result<Self> {
        let n = node_count as usize;
        check_arcs(n, tail, head)?;
        if weight.len() != tail.len() {
            return Err(invalid_input(format!(
                "expected {} weights, got {}",
                tail.len(),
                weight.len()
            )));
        }
        let max_pop_count = if max_pop_count == 0 {
            DEFAULT_MAX_POP_COUNT
        } else {
            max_pop_count
        };

        let start = Instant::now();
        log_message(&format!(
            "Start building CH with {n} nodes and {} arcs, at most {max_pop_count} pops per witness search",
            tail.len()
        ));
        let mut contractor = Contractor::new(n, tail, head, weight, max_pop_count as usize);
        let order = contractor.contract_by_priority(&mut log_message);
        let ch = contractor.into_hierarchy(order, tail, head);
        log_message(&format!(
            "Finished building CH with {} upward and {} downward arcs. Needed {}ms",
            ch.forward.head.len(),
            ch.backward.head.len(),
            start.elapsed().as_millis()
        ));
        Ok(ch)
    }

    /// Contract in a given order with exact witness searches: a shortcut is only kept if no other path
    /// of at most the same weight exists. Inputs must be validated by the caller.
    pub(crate) fn build_perfect(order: &[u32], tail: &[u32], head: &[u32], weight: &[Weight]) -> Self {
        let mut contractor = Contractor::new(order.len(), tail, head, weight, usize::MAX);
        contractor.contract_in_order(order);
        contractor.into_hierarchy(order.to_vec(), tail, head)
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn input_arc_count(&self) -> usize {
        self.input_tail.len()
    }

    /// Number of arcs in the upward and the downward search graph together, shortcuts included.
    pub fn arc_count(&self) -> usize {
        self.forward.head.len() + self.backward.head.len()
    }

    /// The contraction order: `order()[i]` is the `i`-th contracted node.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn rank(&self, node: u32) -> Option<u32> {
        self.rank.get(node as usize).copied()
    }

    /// Write the hierarchy in the crate's binary format.
    pub fn write_to(&self, mut writer: impl Write) -> Result<()> {
        writer.write_all(&FILE_MAGIC)?;
        writer.write_all(&FILE_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut writer, self).map_err(to_io_error)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a hierarchy written by [`ContractionHierarchy::write_to`].
    ///
    /// Foreign or corrupted data is reported as an [`crate::Error::Io`] of kind `InvalidData`.
    pub fn read_from(mut reader: impl Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != FILE_MAGIC {
            return Err(std::io::Error::new(ErrorKind::InvalidData, "not a contraction hierarchy file").into());
        }
        let mut version = [0u8; 4];
        reader.read_exact(&mut version)?;
        let version = u32::from_le_bytes(version);
        if version != FILE_VERSION {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("unsupported contraction hierarchy version {version}"),
            )
            .into());
        }

        let ch: ContractionHierarchy = bincode::deserialize_from(reader).map_err(to_io_error)?;
        if !ch.is_consistent() {
            return Err(std::io::Error::new(ErrorKind::InvalidData, "inconsistent contraction hierarchy").into());
        }
        Ok(ch)
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file))
    }

    fn is_consistent(&self) -> bool {
        let n = self.order.len();
        let m = self.input_tail.len();
        self.rank.len() == n
            && self.order.iter().enumerate().all(|(r, &node)| {
                (node as usize) < n && self.rank[node as usize] as usize == r
            })
            && self.input_head.len() == m
            && self.input_tail.iter().chain(&self.input_head).all(|&node| (node as usize) < n)
            && self.forward.is_consistent(n, m, self.forward.head.len(), self.backward.head.len())
            && self.backward.is_consistent(n, m, self.forward.head.len(), self.backward.head.len())
            && self.shortcuts_descend(&self.forward)
            && self.shortcuts_descend(&self.backward)
    }

    // Both halves of a shortcut start at a common middle ranked below the shortcut's tail,
    // so unpacking strictly descends and terminates.
    fn shortcuts_descend(&self, graph: &UpwardGraph) -> bool {
        graph.unpack.iter().enumerate().all(|(arc, unpack)| match *unpack {
            Unpack::Input(_) => true,
            Unpack::Shortcut { down, up } => {
                let middle = self.backward.tail[down as usize];
                middle == self.forward.tail[up as usize] && middle < graph.tail[arc]
            }
        })
    }

    // Input arcs of a path given as forward arcs (upward part) followed by backward arcs (downward part).
    fn unpack(&self, forward_arcs: &[u32], backward_arcs: &[u32]) -> Vec<u32> {
        #[derive(Clone, Copy)]
        enum Step {
            Forward(u32),
            Backward(u32),
        }

        let mut arcs = Vec::new();
        let mut stack = Vec::new();
        let steps = forward_arcs
            .iter()
            .map(|&arc| Step::Forward(arc))
            .chain(backward_arcs.iter().map(|&arc| Step::Backward(arc)));
        for step in steps {
            stack.push(step);
            while let Some(step) = stack.pop() {
                let unpack = match step {
                    Step::Forward(arc) => self.forward.unpack[arc as usize],
                    Step::Backward(arc) => self.backward.unpack[arc as usize],
                };
                match unpack {
                    Unpack::Input(arc) => arcs.push(arc),
                    Unpack::Shortcut { down, up } => {
                        stack.push(Step::Forward(up));
                        stack.push(Step::Backward(down));
                    }
                }
            }
        }
        arcs
    }
}

/// Upward Dijkstra search in one of the two CH search graphs.
#[derive(Debug, Clone)]
struct UpwardDijkstra {
    dist: Vec<Weight>,
    pred: Vec<u32>,
    settled: Vec<bool>,
    touched: Vec<u32>,
    heap: BinaryHeap<Reverse<(Weight, u32)>>,
}

impl UpwardDijkstra {
    fn new(n: usize) -> Self {
        UpwardDijkstra {
            dist: vec![INFINITY; n],
            pred: vec![INVALID_ID; n],
            settled: vec![false; n],
            touched: Vec::new(),
            heap: BinaryHeap::new(),
        }
    }

    fn clear(&mut self) {
        for &r in &self.touched {
            self.dist[r as usize] = INFINITY;
            self.pred[r as usize] = INVALID_ID;
            self.settled[r as usize] = false;
        }
        self.touched.clear();
        self.heap.clear();
    }

    fn add_root(&mut self, r: u32, dist: Weight) {
        if self.dist[r as usize] == INFINITY {
            self.touched.push(r);
        }
        if dist < self.dist[r as usize] {
            self.dist[r as usize] = dist;
            self.heap.push(Reverse((dist, r)));
        }
    }

    fn min_key(&self) -> Option<Weight> {
        self.heap.peek().map(|&Reverse((dist, _))| dist)
    }

    fn settle_next(&mut self, graph: &UpwardGraph) -> Option<u32> {
        while let Some(Reverse((dist, r))) = self.heap.pop() {
            if self.settled[r as usize] || dist > self.dist[r as usize] {
                continue;
            }
            self.settled[r as usize] = true;
            for arc in graph.arcs(r) {
                let next = graph.head[arc];
                let candidate = link(dist, graph.weight[arc]);
                if candidate < self.dist[next as usize] {
                    if self.dist[next as usize] == INFINITY {
                        self.touched.push(next);
                    }
                    self.dist[next as usize] = candidate;
                    self.pred[next as usize] = arc as u32;
                    self.heap.push(Reverse((candidate, next)));
                }
            }
            return Some(r);
        }
        None
    }

    fn exhaust(&mut self, graph: &UpwardGraph) {
        while self.settle_next(graph).is_some() {}
    }
}

/// Reusable query on a [`ContractionHierarchy`], with the same life cycle as [`crate::CCHQuery`].
pub struct CHQuery<'a> {
    ch: &'a ContractionHierarchy,
    setup: QuerySetup,
    forward: UpwardDijkstra,
    backward: UpwardDijkstra,
    meeting: u32,
    distance: Weight,
    buckets: Buckets,
    distances: Vec<Weight>,
}

impl<'a> CHQuery<'a> {
    pub fn new(ch: &'a ContractionHierarchy) -> Self {
        let n = ch.node_count();
        CHQuery {
            ch,
            setup: QuerySetup::new(n),
            forward: UpwardDijkstra::new(n),
            backward: UpwardDijkstra::new(n),
            meeting: INVALID_ID,
            distance: INFINITY,
            buckets: Buckets::default(),
            distances: Vec::new(),
        }
    }

    /// Clear sources, targets, pinned sets and results.
    pub fn reset(&mut self) {
        self.setup.reset();
    }

    pub fn reset_source(&mut self) {
        self.setup.reset_source();
    }

    pub fn reset_target(&mut self) {
        self.setup.reset_target();
    }

    pub fn add_source(&mut self, s: u32, dist: Weight) -> Result<()> {
        self.setup.add_source(s, dist)
    }

    pub fn add_target(&mut self, t: u32, dist: Weight) -> Result<()> {
        self.setup.add_target(t, dist)
    }

    pub fn pin_sources(&mut self, sources: &[u32]) -> Result<()> {
        self.setup.pin_sources(sources)
    }

    pub fn pin_targets(&mut self, targets: &[u32]) -> Result<()> {
        self.setup.pin_targets(targets)
    }

    /// Bidirectional upward search between the added sources and targets.
    ///
    /// A direction stops once its smallest queue key reaches the tentative distance.
    pub fn run(&mut self) -> Result<()> {
        self.setup.check_point_to_point()?;
        let ch = self.ch;
        self.forward.clear();
        self.backward.clear();
        for &(node, dist) in &self.setup.sources {
            self.forward.add_root(ch.rank[node as usize], dist);
        }
        for &(node, dist) in &self.setup.targets {
            self.backward.add_root(ch.rank[node as usize], dist);
        }

        self.meeting = INVALID_ID;
        self.distance = INFINITY;
        loop {
            let forward_key = self.forward.min_key().filter(|&key| key < self.distance);
            let backward_key = self.backward.min_key().filter(|&key| key < self.distance);
            let (settled, dist, other) = match (forward_key, backward_key) {
                (None, None) => break,
                (Some(f), Some(b)) if f <= b => self.step_forward(),
                (Some(_), None) => self.step_forward(),
                _ => self.step_backward(),
            };
            let Some(r) = settled else { continue };
            let candidate = link(dist, other);
            if candidate < self.distance || (candidate == self.distance && candidate != INFINITY && r < self.meeting) {
                self.distance = candidate;
                self.meeting = r;
            }
        }

        self.setup.ran = Some(RunKind::PointToPoint);
        Ok(())
    }

    fn step_forward(&mut self) -> (Option<u32>, Weight, Weight) {
        let settled = self.forward.settle_next(&self.ch.forward);
        match settled {
            Some(r) => (Some(r), self.forward.dist[r as usize], self.backward.dist[r as usize]),
            None => (None, INFINITY, INFINITY),
        }
    }

    fn step_backward(&mut self) -> (Option<u32>, Weight, Weight) {
        let settled = self.backward.settle_next(&self.ch.backward);
        match settled {
            Some(r) => (Some(r), self.backward.dist[r as usize], self.forward.dist[r as usize]),
            None => (None, INFINITY, INFINITY),
        }
    }

    pub fn run_to_pinned_targets(&mut self) -> Result<()> {
        let (rows, columns) = self.setup.to_pinned_targets()?;
        self.many_to_many(true, &rows, &columns);
        self.setup.ran = Some(RunKind::ToPinnedTargets);
        Ok(())
    }

    pub fn run_to_pinned_sources(&mut self) -> Result<()> {
        let (rows, columns) = self.setup.to_pinned_sources()?;
        self.many_to_many(false, &rows, &columns);
        self.setup.ran = Some(RunKind::ToPinnedSources);
        Ok(())
    }

    // Rows search forward (towards pinned targets) or backward (towards pinned sources).
    fn many_to_many(&mut self, rows_forward: bool, rows: &[Vec<(u32, Weight)>], columns: &[u32]) {
        let ch = self.ch;
        let (row_graph, column_graph) = if rows_forward {
            (&ch.forward, &ch.backward)
        } else {
            (&ch.backward, &ch.forward)
        };
        let (row_search, column_search) = if rows_forward {
            (&mut self.forward, &mut self.backward)
        } else {
            (&mut self.backward, &mut self.forward)
        };

        self.buckets.clear();
        for (slot, &node) in columns.iter().enumerate() {
            column_search.clear();
            column_search.add_root(ch.rank[node as usize], 0);
            column_search.exhaust(column_graph);
            for &r in &column_search.touched {
                if column_search.settled[r as usize] {
                    self.buckets.push(r, slot as u32, column_search.dist[r as usize]);
                }
            }
        }
        column_search.clear();
        self.buckets.seal();

        self.distances.clear();
        self.distances.resize(rows.len() * columns.len(), INFINITY);
        for (row, roots) in rows.iter().enumerate() {
            let row_out = &mut self.distances[row * columns.len()..(row + 1) * columns.len()];
            row_search.clear();
            for &(node, dist) in roots {
                row_search.add_root(ch.rank[node as usize], dist);
            }
            row_search.exhaust(row_graph);
            for &r in &row_search.touched {
                if !row_search.settled[r as usize] {
                    continue;
                }
                let dist = row_search.dist[r as usize];
                for entry in self.buckets.at(r) {
                    let slot = &mut row_out[entry.slot as usize];
                    *slot = (*slot).min(link(dist, entry.dist));
                }
            }
        }
        row_search.clear();
        self.meeting = INVALID_ID;
        self.distance = INFINITY;
    }

    /// Shortest distance after [`CHQuery::run`], `None` if no target is reachable.
    pub fn distance(&self) -> Result<Option<Weight>> {
        self.setup.require(RunKind::PointToPoint, "distance")?;
        Ok((self.distance != INFINITY).then_some(self.distance))
    }

    /// Input arcs of the shortest path from source to target, empty if unreachable.
    pub fn arc_path(&self) -> Result<Vec<u32>> {
        self.setup.require(RunKind::PointToPoint, "arc path")?;
        if self.meeting == INVALID_ID {
            return Ok(Vec::new());
        }
        let mut forward_arcs = Vec::new();
        let mut current = self.meeting;
        while self.forward.pred[current as usize] != INVALID_ID {
            let arc = self.forward.pred[current as usize];
            forward_arcs.push(arc);
            current = self.ch.forward.tail[arc as usize];
        }
        forward_arcs.reverse();

        let mut backward_arcs = Vec::new();
        let mut current = self.meeting;
        while self.backward.pred[current as usize] != INVALID_ID {
            let arc = self.backward.pred[current as usize];
            backward_arcs.push(arc);
            current = self.ch.backward.tail[arc as usize];
        }
        Ok(self.ch.unpack(&forward_arcs, &backward_arcs))
    }

    /// Nodes of the shortest path from source to target, empty if unreachable.
    pub fn node_path(&self) -> Result<Vec<u32>> {
        let arcs = self.arc_path()?;
        if self.meeting == INVALID_ID {
            return Ok(Vec::new());
        }
        let mut source = self.meeting;
        while self.forward.pred[source as usize] != INVALID_ID {
            source = self.ch.forward.tail[self.forward.pred[source as usize] as usize];
        }
        Ok(node_path(self.ch.order[source as usize], &arcs, &self.ch.input_head))
    }

    pub fn distances_to_targets(&self) -> Result<Vec<Weight>> {
        self.setup.require(RunKind::ToPinnedTargets, "distances to targets")?;
        Ok(self.distances.clone())
    }

    pub fn distances_to_targets_into(&self, out: &mut [Weight]) -> Result<()> {
        self.setup.require(RunKind::ToPinnedTargets, "distances to targets")?;
        copy_into(&self.distances, out)
    }

    pub fn distances_to_sources(&self) -> Result<Vec<Weight>> {
        self.setup.require(RunKind::ToPinnedSources, "distances to sources")?;
        Ok(self.distances.clone())
    }

    pub fn distances_to_sources_into(&self, out: &mut [Weight]) -> Result<()> {
        self.setup.require(RunKind::ToPinnedSources, "distances to sources")?;
        copy_into(&self.distances, out)
    }

    /// Distances from `source` to each of `targets` with one upward search and a downward sweep over all nodes.
    ///
    /// Leaves sources and targets alone but discards the result of the last run.
    pub fn phast_to_targets(&mut self, source: u32, targets: &[u32]) -> Result<Vec<Weight>> {
        let ch = self.ch;
        let n = ch.node_count();
        if let Some(&node) = std::iter::once(&source).chain(targets).find(|&&node| node as usize >= n) {
            return Err(invalid_input(format!("node {node} is out of range, there are {n} nodes")));
        }
        self.setup.ran = None;

        self.forward.clear();
        self.forward.add_root(ch.rank[source as usize], 0);
        self.forward.exhaust(&ch.forward);
        let mut all = vec![INFINITY; n];
        for &r in &self.forward.touched {
            all[r as usize] = self.forward.dist[r as usize];
        }
        self.forward.clear();

        for r in (0..n as u32).rev() {
            let mut best = all[r as usize];
            for arc in ch.backward.arcs(r) {
                best = best.min(link(all[ch.backward.head[arc] as usize], ch.backward.weight[arc]));
            }
            all[r as usize] = best;
        }
        Ok(targets.iter().map(|&t| all[ch.rank[t as usize] as usize]).collect())
    }

    /// The hierarchy this query runs on.
    pub fn hierarchy(&self) -> &'a ContractionHierarchy {
        self.ch
    }
}
