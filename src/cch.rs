//! The metric independent part of a CCH.
//!
//! All internal ids are ranks: node `r` is the `r`-th node of the order. Arcs point from the lower
//! to the higher rank and are numbered by tail rank, so an arc id also tells when it is customized.

use crate::contraction::{ChordalGraph, chordal_completion};
use crate::error::{Result, check_arcs, invalid_input};
use std::ops::Range;
use std::time::Instant;

pub(crate) const INVALID_ID: u32 = u32::MAX;

/// A lower triangle of some CCH arc `(x, y)`: the arcs `(v, x)` and `(v, y)` for a node `v` below `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Triangle {
    pub first: u32,
    pub second: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct CCHStructure {
    pub order: Vec<u32>,
    pub rank: Vec<u32>,

    pub first_out: Vec<u32>,
    pub head: Vec<u32>,
    pub tail: Vec<u32>,

    // parent rank in the elimination tree of the unfiltered completion
    pub elimination_tree: Vec<u32>,

    pub input_tail: Vec<u32>,
    pub input_head: Vec<u32>,
    pub input_to_cch: Vec<u32>,

    first_up_input: Vec<u32>,
    up_input: Vec<u32>,
    first_down_input: Vec<u32>,
    down_input: Vec<u32>,

    first_triangle: Vec<u32>,
    triangles: Vec<Triangle>,

    // nodes grouped by height in the elimination tree, leaves first
    level_first: Vec<u32>,
    level_nodes: Vec<u32>,
}

impl CCHStructure {
    pub fn new(
        order: &[u32],
        tail: &[u32],
        head: &[u32],
        log_message: &mut dyn FnMut(&str),
        filter_always_inf_arcs: bool,
    ) -> Result<Self> {
        let n = order.len();
        check_arcs(n, tail, head)?;
        let rank = invert_order(order)?;

        let start = Instant::now();
        log_message(&format!("Start building CCH with {n} nodes and {} arcs", tail.len()));

        let (completion, shortcut_count) = chordal_completion(&rank, tail, head);
        log_message(&format!(
            "Chordal completion has {} arcs, {shortcut_count} of them fill-in. Needed {}ms",
            completion.arc_count(),
            start.elapsed().as_millis()
        ));

        let elimination_tree: Vec<u32> = (0..n as u32)
            .map(|r| completion.elimination_tree_parent(r).unwrap_or(INVALID_ID))
            .collect();

        let completion = if filter_always_inf_arcs {
            let before = completion.arc_count();
            let filtered = filter_always_infinite(completion, &rank, tail, head);
            log_message(&format!(
                "Removed {} always infinite shortcuts, {} arcs remain",
                before - filtered.arc_count(),
                filtered.arc_count()
            ));
            filtered
        } else {
            completion
        };

        let ChordalGraph {
            first_out,
            head: cch_head,
        } = completion;
        let cch_tail = tails(&first_out);

        let mapping = InputMapping::new(&rank, &first_out, &cch_head, tail, head);
        let (first_triangle, triangles) = lower_triangles(&first_out, &cch_head);
        log_message(&format!(
            "Enumerated {} lower triangles. Needed {}ms",
            triangles.len(),
            start.elapsed().as_millis()
        ));

        let (level_first, level_nodes) = levels(&elimination_tree);

        let cch = CCHStructure {
            order: order.to_vec(),
            rank,
            first_out,
            head: cch_head,
            tail: cch_tail,
            elimination_tree,
            input_tail: tail.to_vec(),
            input_head: head.to_vec(),
            input_to_cch: mapping.input_to_cch,
            first_up_input: mapping.first_up_input,
            up_input: mapping.up_input,
            first_down_input: mapping.first_down_input,
            down_input: mapping.down_input,
            first_triangle,
            triangles,
            level_first,
            level_nodes,
        };
        log_message(&format!(
            "Finished building CCH with {} arcs and {} levels. Needed {}ms",
            cch.cch_arc_count(),
            cch.level_count(),
            start.elapsed().as_millis()
        ));
        Ok(cch)
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn input_arc_count(&self) -> usize {
        self.input_tail.len()
    }

    pub fn cch_arc_count(&self) -> usize {
        self.head.len()
    }

    /// Ids of the upward arcs of rank `r`.
    pub fn up_arcs(&self, r: u32) -> Range<usize> {
        self.first_out[r as usize] as usize..self.first_out[r as usize + 1] as usize
    }

    pub fn neighbors(&self, r: u32) -> &[u32] {
        &self.head[self.up_arcs(r)]
    }

    pub fn arc_between(&self, low: u32, high: u32) -> Option<u32> {
        arc_between(&self.first_out, &self.head, low, high)
    }

    pub fn elimination_tree_parent(&self, r: u32) -> Option<u32> {
        let parent = self.elimination_tree[r as usize];
        (parent != INVALID_ID).then_some(parent)
    }

    /// Input arcs traversed from the lower to the higher endpoint of CCH arc `arc`, ascending.
    pub fn up_inputs(&self, arc: usize) -> &[u32] {
        &self.up_input[self.first_up_input[arc] as usize..self.first_up_input[arc + 1] as usize]
    }

    /// Input arcs traversed from the higher to the lower endpoint of CCH arc `arc`, ascending.
    pub fn down_inputs(&self, arc: usize) -> &[u32] {
        &self.down_input[self.first_down_input[arc] as usize..self.first_down_input[arc + 1] as usize]
    }

    /// Lower triangles of `arc`, by ascending rank of the bottom node.
    pub fn lower_triangles(&self, arc: usize) -> &[Triangle] {
        &self.triangles[self.first_triangle[arc] as usize..self.first_triangle[arc + 1] as usize]
    }

    pub fn level_count(&self) -> usize {
        self.level_first.len() - 1
    }

    pub fn level(&self, level: usize) -> &[u32] {
        &self.level_nodes[self.level_first[level] as usize..self.level_first[level + 1] as usize]
    }
}

fn invert_order(order: &[u32]) -> Result<Vec<u32>> {
    let n = order.len();
    let mut rank = vec![INVALID_ID; n];
    for (r, &node) in order.iter().enumerate() {
        if node as usize >= n {
            return Err(invalid_input(format!("order mentions node {node}, but there are only {n} nodes")));
        }
        if rank[node as usize] != INVALID_ID {
            return Err(invalid_input(format!("node {node} appears twice in the order")));
        }
        rank[node as usize] = r as u32;
    }
    Ok(rank)
}

fn arc_between(first_out: &[u32], head: &[u32], low: u32, high: u32) -> Option<u32> {
    let begin = first_out[low as usize] as usize;
    let end = first_out[low as usize + 1] as usize;
    head[begin..end]
        .binary_search(&high)
        .ok()
        .map(|offset| (begin + offset) as u32)
}

fn tails(first_out: &[u32]) -> Vec<u32> {
    let mut tail = Vec::with_capacity(*first_out.last().unwrap_or(&0) as usize);
    for (r, window) in first_out.windows(2).enumerate() {
        tail.extend(std::iter::repeat_n(r as u32, (window[1] - window[0]) as usize));
    }
    tail
}

// Turn per element keys into an adjacency array: `first[k]..first[k + 1]` indexes the elements with key `k`,
// in the order `items` yields them.
fn group_by_key(key_count: usize, items: impl Iterator<Item = (u32, u32)> + Clone) -> (Vec<u32>, Vec<u32>) {
    let mut first = vec![0u32; key_count + 1];
    for (key, _) in items.clone() {
        first[key as usize + 1] += 1;
    }
    for idx in 0..key_count {
        first[idx + 1] += first[idx];
    }
    let mut fill = first.clone();
    let mut values = vec![0u32; first[key_count] as usize];
    for (key, value) in items {
        values[fill[key as usize] as usize] = value;
        fill[key as usize] += 1;
    }
    (first, values)
}

struct InputMapping {
    input_to_cch: Vec<u32>,
    first_up_input: Vec<u32>,
    up_input: Vec<u32>,
    first_down_input: Vec<u32>,
    down_input: Vec<u32>,
}

impl InputMapping {
    fn new(rank: &[u32], first_out: &[u32], cch_head: &[u32], tail: &[u32], head: &[u32]) -> Self {
        let m_cch = cch_head.len();
        let mut input_to_cch = vec![INVALID_ID; tail.len()];
        let mut upward = vec![false; tail.len()];
        for (arc, (&u, &v)) in tail.iter().zip(head).enumerate() {
            let (ru, rv) = (rank[u as usize], rank[v as usize]);
            if ru == rv {
                continue;
            }
            let (low, high) = (ru.min(rv), ru.max(rv));
            if let Some(cch_arc) = arc_between(first_out, cch_head, low, high) {
                input_to_cch[arc] = cch_arc;
                upward[arc] = ru < rv;
            }
        }

        let (first_up_input, up_input) = group_by_key(m_cch, mapped_arcs(&input_to_cch, &upward, true));
        let (first_down_input, down_input) = group_by_key(m_cch, mapped_arcs(&input_to_cch, &upward, false));

        InputMapping {
            input_to_cch,
            first_up_input,
            up_input,
            first_down_input,
            down_input,
        }
    }
}

// `(cch arc, input arc)` for all input arcs traversing their CCH arc in the given direction
fn mapped_arcs<'a>(
    input_to_cch: &'a [u32],
    upward: &'a [bool],
    up: bool,
) -> impl Iterator<Item = (u32, u32)> + Clone + 'a {
    (0..input_to_cch.len() as u32)
        .filter(move |&arc| input_to_cch[arc as usize] != INVALID_ID && upward[arc as usize] == up)
        .map(move |arc| (input_to_cch[arc as usize], arc))
}

fn lower_triangles(first_out: &[u32], head: &[u32]) -> (Vec<u32>, Vec<Triangle>) {
    let n = first_out.len() - 1;
    let triangles_of = move |v: usize| {
        let (begin, end) = (first_out[v] as usize, first_out[v + 1] as usize);
        (begin..end).flat_map(move |i| {
            (i + 1..end).filter_map(move |j| {
                arc_between(first_out, head, head[i], head[j]).map(|arc| (arc, i as u32, j as u32))
            })
        })
    };

    let m = head.len();
    let mut first_triangle = vec![0u32; m + 1];
    for v in 0..n {
        for (arc, _, _) in triangles_of(v) {
            first_triangle[arc as usize + 1] += 1;
        }
    }
    for arc in 0..m {
        first_triangle[arc + 1] += first_triangle[arc];
    }

    let mut fill = first_triangle.clone();
    let mut triangles = vec![Triangle { first: 0, second: 0 }; first_triangle[m] as usize];
    for v in 0..n {
        for (arc, first, second) in triangles_of(v) {
            triangles[fill[arc as usize] as usize] = Triangle { first, second };
            fill[arc as usize] += 1;
        }
    }

    (first_triangle, triangles)
}

// Drop shortcuts that stay infinite in both directions no matter which finite weights the input arcs get.
fn filter_always_infinite(completion: ChordalGraph, rank: &[u32], tail: &[u32], head: &[u32]) -> ChordalGraph {
    let mapping = InputMapping::new(rank, &completion.first_out, &completion.head, tail, head);
    let (first_triangle, triangles) = lower_triangles(&completion.first_out, &completion.head);

    let m = completion.arc_count();
    let mut finite_up = vec![false; m];
    let mut finite_down = vec![false; m];
    for arc in 0..m {
        let mut up = mapping.first_up_input[arc] != mapping.first_up_input[arc + 1];
        let mut down = mapping.first_down_input[arc] != mapping.first_down_input[arc + 1];
        for triangle in &triangles[first_triangle[arc] as usize..first_triangle[arc + 1] as usize] {
            let (first, second) = (triangle.first as usize, triangle.second as usize);
            up |= finite_down[first] && finite_up[second];
            down |= finite_up[first] && finite_down[second];
        }
        finite_up[arc] = up;
        finite_down[arc] = down;
    }

    let n = completion.node_count();
    let mut first_out = Vec::with_capacity(n + 1);
    first_out.push(0u32);
    let mut filtered_head = Vec::new();
    for r in 0..n {
        let arcs = completion.first_out[r] as usize..completion.first_out[r + 1] as usize;
        filtered_head.extend(
            arcs.filter(|&arc| finite_up[arc] || finite_down[arc])
                .map(|arc| completion.head[arc]),
        );
        first_out.push(filtered_head.len() as u32);
    }

    ChordalGraph {
        first_out,
        head: filtered_head,
    }
}

fn levels(elimination_tree: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let n = elimination_tree.len();
    let mut height = vec![0u32; n];
    let mut level_count = 0;
    // children have lower ranks than their parents
    for r in 0..n {
        level_count = level_count.max(height[r] as usize + 1);
        let parent = elimination_tree[r];
        if parent != INVALID_ID {
            height[parent as usize] = height[parent as usize].max(height[r] + 1);
        }
    }
    group_by_key(level_count, (0..n as u32).map(|r| (height[r as usize], r)))
}
