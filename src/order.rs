//! Node orders for contraction.
//!
//! Two heuristics are provided: a cheap one sorting nodes by degree and a nested dissection
//! order computed with inertial flow. The latter needs coordinates but yields far smaller
//! hierarchies on road networks.

use crate::error::{Result, check_arcs, invalid_input};
use std::collections::VecDeque;

/// Cells with at most this many nodes are not dissected any further.
pub const INERTIAL_FLOW_LEAF_SIZE: usize = 4;

/// Fraction of a cell (by projection onto the principal axis) used as source and as sink terminals.
pub const INERTIAL_FLOW_TERMINAL_FRACTION: f64 = 0.25;

/// Fast fallback order: nodes sorted by `(degree, id)` ascending.
///
/// The degree counts both endpoints of every arc, so a self-loop adds two to its node.
/// Lower quality than nested dissection but needs no extra data.
pub fn compute_order_degree(node_count: u32, tail: &[u32], head: &[u32]) -> Result<Vec<u32>> {
    let n = node_count as usize;
    check_arcs(n, tail, head)?;

    let mut degree = vec![0u32; n];
    for (&u, &v) in tail.iter().zip(head) {
        degree[u as usize] += 1;
        degree[v as usize] += 1;
    }

    let mut order: Vec<u32> = (0..node_count).collect();
    order.sort_by_key(|&node| (degree[node as usize], node));
    Ok(order)
}

/// Compute a nested dissection order using inertial flow separators.
///
/// Arcs are treated as undirected. Every connected cell is projected onto the principal axis of
/// its coordinates, the first and last quarter of the projection become source and sink terminals,
/// and a minimum vertex cut between them (unit capacity max flow) becomes the separator.
/// Separators receive the highest ranks of their cell; the remaining components are ordered recursively.
///
/// Coordinates are only compared with each other, any consistent units work.
/// The result is deterministic, ties are broken by node id.
pub fn compute_order_inertial(
    node_count: u32,
    tail: &[u32],
    head: &[u32],
    latitude: &[f32],
    longitude: &[f32],
) -> Result<Vec<u32>> {
    let n = node_count as usize;
    if latitude.len() != n || longitude.len() != n {
        return Err(invalid_input(format!(
            "expected {n} coordinates, got {} latitudes and {} longitudes",
            latitude.len(),
            longitude.len()
        )));
    }
    check_arcs(n, tail, head)?;

    let graph = UndirectedGraph::new(n, tail, head);
    let coords: Vec<(f64, f64)> = longitude
        .iter()
        .zip(latitude)
        .map(|(&x, &y)| (x as f64, y as f64))
        .collect();

    let mut dissection = Dissection::new(&graph, &coords);
    let order = dissection.run();
    debug_assert_eq!(order.len(), n);
    log::debug!(
        "inertial flow order: {} nodes, {} cells, largest separator {}",
        n,
        dissection.cells_processed,
        dissection.largest_separator
    );
    Ok(order)
}

/// Symmetric adjacency array without loops and multi-edges.
struct UndirectedGraph {
    first_out: Vec<u32>,
    head: Vec<u32>,
}

impl UndirectedGraph {
    fn new(n: usize, tail: &[u32], head: &[u32]) -> Self {
        let mut neighbors = vec![Vec::new(); n];
        for (&u, &v) in tail.iter().zip(head) {
            if u != v {
                neighbors[u as usize].push(v);
                neighbors[v as usize].push(u);
            }
        }

        let mut first_out = Vec::with_capacity(n + 1);
        first_out.push(0);
        let mut flat = Vec::new();
        for mut list in neighbors {
            list.sort_unstable();
            list.dedup();
            flat.extend_from_slice(&list);
            first_out.push(flat.len() as u32);
        }

        UndirectedGraph {
            first_out,
            head: flat,
        }
    }

    fn neighbors(&self, node: u32) -> &[u32] {
        &self.head[self.first_out[node as usize] as usize..self.first_out[node as usize + 1] as usize]
    }
}

struct Dissection<'g> {
    graph: &'g UndirectedGraph,
    coords: &'g [(f64, f64)],
    // cell membership and visited markers, compared against fresh stamps
    mark: Vec<u32>,
    stamp: u32,
    // node id -> index inside the cell currently being cut
    local: Vec<u32>,
    cells_processed: usize,
    largest_separator: usize,
}

impl<'g> Dissection<'g> {
    fn new(graph: &'g UndirectedGraph, coords: &'g [(f64, f64)]) -> Self {
        let n = coords.len();
        Dissection {
            graph,
            coords,
            mark: vec![0; n],
            stamp: 0,
            local: vec![0; n],
            cells_processed: 0,
            largest_separator: 0,
        }
    }

    fn next_stamp(&mut self) -> u32 {
        self.stamp += 1;
        self.stamp
    }

    // Nodes are collected from the most important to the least important one and reversed at the end.
    // A cell pushes its separator before its children are popped, so separators end up above their cells.
    fn run(&mut self) -> Vec<u32> {
        let n = self.coords.len();
        let mut reversed_order = Vec::with_capacity(n);
        let mut cells = vec![(0..n as u32).collect::<Vec<u32>>()];

        while let Some(cell) = cells.pop() {
            self.cells_processed += 1;
            if cell.len() <= INERTIAL_FLOW_LEAF_SIZE {
                reversed_order.extend(cell.iter().rev());
                continue;
            }

            let mut components = self.components(&cell);
            if components.len() > 1 {
                // smaller ids first, so they get popped last and receive lower ranks
                components.sort_by_key(|component| component[0]);
                cells.extend(components);
                continue;
            }

            let separator = self.separator(&cell);
            debug_assert!(!separator.is_empty());
            self.largest_separator = self.largest_separator.max(separator.len());

            let stamp = self.next_stamp();
            for &node in &separator {
                self.mark[node as usize] = stamp;
            }
            let rest: Vec<u32> = cell
                .iter()
                .copied()
                .filter(|&node| self.mark[node as usize] != stamp)
                .collect();

            reversed_order.extend(separator.iter().rev());
            if !rest.is_empty() {
                cells.push(rest);
            }
        }

        reversed_order.reverse();
        reversed_order
    }

    // Connected components of the subgraph induced by `cell`, each sorted ascending.
    fn components(&mut self, cell: &[u32]) -> Vec<Vec<u32>> {
        let member = self.next_stamp();
        for &node in cell {
            self.mark[node as usize] = member;
        }

        let mut components = Vec::new();
        let mut queue = VecDeque::new();
        for &start in cell {
            if self.mark[start as usize] != member {
                continue;
            }
            let visited = self.next_stamp();
            self.mark[start as usize] = visited;
            queue.push_back(start);
            let mut component = Vec::new();

            while let Some(node) = queue.pop_front() {
                component.push(node);
                for &neighbor in self.graph.neighbors(node) {
                    if self.mark[neighbor as usize] == member {
                        self.mark[neighbor as usize] = visited;
                        queue.push_back(neighbor);
                    }
                }
            }

            component.sort_unstable();
            components.push(component);
        }

        components
    }

    // Minimum vertex cut between both ends of the projection of a connected cell, sorted by id.
    fn separator(&mut self, cell: &[u32]) -> Vec<u32> {
        let (ax, ay) = principal_axis(self.coords, cell);
        let mut projected: Vec<(f64, u32)> = cell
            .iter()
            .map(|&node| {
                let (x, y) = self.coords[node as usize];
                (x * ax + y * ay, node)
            })
            .collect();
        projected.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let terminals = ((cell.len() as f64 * INERTIAL_FLOW_TERMINAL_FRACTION) as usize).max(1);
        let sources: Vec<u32> = projected[..terminals].iter().map(|&(_, node)| node).collect();
        let sinks: Vec<u32> = projected[cell.len() - terminals..].iter().map(|&(_, node)| node).collect();

        for (idx, &node) in cell.iter().enumerate() {
            self.local[node as usize] = idx as u32;
        }
        let member = self.next_stamp();
        for &node in cell {
            self.mark[node as usize] = member;
        }

        let mut flow = VertexCutFlow::new(self.graph, cell, &self.local, &self.mark, member);
        for &node in &sources {
            flow.is_source[self.local[node as usize] as usize] = true;
        }
        for &node in &sinks {
            flow.is_sink[self.local[node as usize] as usize] = true;
        }

        let mut separator = flow.min_vertex_cut();
        for node in &mut separator {
            *node = cell[*node as usize];
        }
        separator.sort_unstable();
        separator
    }
}

// Direction of the larger eigenvector of the coordinate covariance matrix.
fn principal_axis(coords: &[(f64, f64)], cell: &[u32]) -> (f64, f64) {
    let count = cell.len() as f64;
    let (sum_x, sum_y) = cell.iter().fold((0.0, 0.0), |(sx, sy), &node| {
        let (x, y) = coords[node as usize];
        (sx + x, sy + y)
    });
    let (cx, cy) = (sum_x / count, sum_y / count);

    let (mut cxx, mut cyy, mut cxy) = (0.0f64, 0.0f64, 0.0f64);
    for &node in cell {
        let (x, y) = coords[node as usize];
        let (dx, dy) = (x - cx, y - cy);
        cxx += dx * dx;
        cyy += dy * dy;
        cxy += dx * dy;
    }

    if cxy.abs() > 1e-12 {
        let trace = cxx + cyy;
        let det = cxx * cyy - cxy * cxy;
        let lambda = trace / 2.0 + ((trace * trace / 4.0) - det).max(0.0).sqrt();
        let (vx, vy) = (lambda - cyy, cxy);
        let len = (vx * vx + vy * vy).sqrt();
        (vx / len, vy / len)
    } else if cxx >= cyy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    }
}

/// Unit vertex capacity max flow on the split graph of one cell.
///
/// Every cell node `i` becomes `in(i) = 2i` and `out(i) = 2i + 1` joined by an arc of capacity one.
/// Graph edges become `out(i) -> in(j)` arcs of unbounded capacity, so every minimum cut consists of vertex arcs.
struct VertexCutFlow {
    first_out: Vec<u32>,
    head: Vec<u32>,
    // flow on out(i) -> in(head) for every adjacency slot
    arc_flow: Vec<u32>,
    vertex_flow: Vec<bool>,
    is_source: Vec<bool>,
    is_sink: Vec<bool>,
}

const SUPER_SOURCE: u32 = u32::MAX;
const UNREACHED: u32 = u32::MAX - 1;

impl VertexCutFlow {
    fn new(graph: &UndirectedGraph, cell: &[u32], local: &[u32], mark: &[u32], member: u32) -> Self {
        let mut first_out = Vec::with_capacity(cell.len() + 1);
        first_out.push(0);
        let mut head = Vec::new();
        for &node in cell {
            head.extend(
                graph
                    .neighbors(node)
                    .iter()
                    .filter(|&&neighbor| mark[neighbor as usize] == member)
                    .map(|&neighbor| local[neighbor as usize]),
            );
            first_out.push(head.len() as u32);
        }
        let arcs = head.len();

        VertexCutFlow {
            first_out,
            head,
            arc_flow: vec![0; arcs],
            vertex_flow: vec![false; cell.len()],
            is_source: vec![false; cell.len()],
            is_sink: vec![false; cell.len()],
        }
    }

    fn slots(&self, node: u32) -> std::ops::Range<usize> {
        self.first_out[node as usize] as usize..self.first_out[node as usize + 1] as usize
    }

    // Breadth first search in the residual graph. Returns the parent of every reached split node
    // and the out node through which a sink was reached, if any.
    fn residual_search(&self) -> (Vec<u32>, Option<u32>) {
        let node_count = self.vertex_flow.len();
        let mut parent = vec![UNREACHED; 2 * node_count];
        let mut queue = VecDeque::new();

        for node in 0..node_count as u32 {
            if self.is_source[node as usize] {
                parent[2 * node as usize] = SUPER_SOURCE;
                queue.push_back(2 * node);
            }
        }

        // Reverse arcs into an in node: for in(j), the slots out(i) -> in(j) carrying flow.
        // Scanning all arcs per visit would be quadratic, so collect them once.
        let mut incoming_first = vec![0u32; node_count + 1];
        for &to in &self.head {
            incoming_first[to as usize + 1] += 1;
        }
        for idx in 0..node_count {
            incoming_first[idx + 1] += incoming_first[idx];
        }
        let mut incoming = vec![(0u32, 0u32); self.head.len()];
        let mut fill = incoming_first.clone();
        for from in 0..node_count as u32 {
            for slot in self.slots(from) {
                let to = self.head[slot] as usize;
                incoming[fill[to] as usize] = (from, slot as u32);
                fill[to] += 1;
            }
        }

        while let Some(split) = queue.pop_front() {
            let node = split / 2;
            if split % 2 == 0 {
                // in(node) -> out(node) if the vertex arc is free
                if !self.vertex_flow[node as usize] && parent[split as usize + 1] == UNREACHED {
                    parent[split as usize + 1] = split;
                    queue.push_back(split + 1);
                }
                // in(node) -> out(from) backwards over used edge arcs
                for &(from, slot) in &incoming[incoming_first[node as usize] as usize..incoming_first[node as usize + 1] as usize] {
                    let target = 2 * from + 1;
                    if self.arc_flow[slot as usize] > 0 && parent[target as usize] == UNREACHED {
                        parent[target as usize] = split;
                        queue.push_back(target);
                    }
                }
            } else {
                if self.is_sink[node as usize] {
                    return (parent, Some(split));
                }
                // out(node) -> in(node) backwards over a used vertex arc
                if self.vertex_flow[node as usize] && parent[split as usize - 1] == UNREACHED {
                    parent[split as usize - 1] = split;
                    queue.push_back(split - 1);
                }
                for slot in self.slots(node) {
                    let target = 2 * self.head[slot];
                    if parent[target as usize] == UNREACHED {
                        parent[target as usize] = split;
                        queue.push_back(target);
                    }
                }
            }
        }

        (parent, None)
    }

    fn augment(&mut self, parent: &[u32], mut current: u32) {
        while parent[current as usize] != SUPER_SOURCE {
            let prev = parent[current as usize];
            let (prev_node, node) = (prev / 2, current / 2);
            match (prev % 2, current % 2) {
                // vertex arc forward or backward
                (0, 1) if prev_node == node => self.vertex_flow[node as usize] = true,
                (1, 0) if prev_node == node => self.vertex_flow[node as usize] = false,
                // edge arc out(prev) -> in(node) forward
                (1, 0) => {
                    let slot = self.slot(prev_node, node);
                    self.arc_flow[slot] += 1;
                }
                // edge arc out(node) -> in(prev) taken backwards
                (0, 1) => {
                    let slot = self.slot(node, prev_node);
                    self.arc_flow[slot] -= 1;
                }
                _ => unreachable!("residual arcs alternate between in and out nodes"),
            }
            current = prev;
        }
    }

    fn slot(&self, from: u32, to: u32) -> usize {
        let range = self.slots(from);
        let offset = self.head[range.clone()]
            .binary_search(&to)
            .unwrap_or_else(|_| unreachable!("edge arcs exist in both directions"));
        range.start + offset
    }

    fn min_vertex_cut(&mut self) -> Vec<u32> {
        loop {
            let (parent, sink) = self.residual_search();
            match sink {
                Some(out_node) => self.augment(&parent, out_node),
                None => {
                    // vertices whose in node is reachable but whose out node is not
                    return (0..self.vertex_flow.len() as u32)
                        .filter(|&node| {
                            parent[2 * node as usize] != UNREACHED && parent[2 * node as usize + 1] == UNREACHED
                        })
                        .collect();
                }
            }
        }
    }
}
