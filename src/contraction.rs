//! Chordal completion of an ordered graph, the topology phase of CCH preprocessing.
//!
//! Nodes are processed by increasing rank. Contracting a node only requires merging its
//! remaining upward neighborhood into the neighborhood of its lowest upward neighbor,
//! which is exactly its parent in the elimination tree.

use std::cmp::Ordering;
use std::ops::{Index, IndexMut};

// Upward neighborhood of one node, as sorted ranks.
#[derive(Debug, Default)]
struct Node {
    edges: Vec<u32>,
}

impl Node {
    // Merges the neighborhood of another node into this node.
    // Both neighborhoods are sorted, so a coordinated linear sweep keeps the result sorted and duplicate free.
    fn merge_neighbors(&mut self, others: &[u32]) {
        let mut new_edges = Vec::with_capacity(self.edges.len() + others.len());
        let mut self_iter = self.edges.iter().peekable();
        let mut other_iter = others.iter().peekable();

        loop {
            match (self_iter.peek(), other_iter.peek()) {
                (Some(&&own), Some(&&other)) => match own.cmp(&other) {
                    Ordering::Less => {
                        new_edges.push(own);
                        self_iter.next();
                    }
                    Ordering::Greater => {
                        new_edges.push(other);
                        other_iter.next();
                    }
                    Ordering::Equal => {
                        new_edges.push(own);
                        self_iter.next();
                        other_iter.next();
                    }
                },
                (Some(&&own), None) => {
                    new_edges.push(own);
                    self_iter.next();
                }
                (None, Some(&&other)) => {
                    new_edges.push(other);
                    other_iter.next();
                }
                (None, None) => break,
            }
        }

        self.edges = new_edges;
    }
}

// The not yet contracted suffix of the nodes; indexed by rank.
struct PartialContractionGraph<'a> {
    nodes: &'a mut [Node],
    id_offset: u32,
}

impl<'a> PartialContractionGraph<'a> {
    fn remove_lowest(self) -> Option<(&'a Node, PartialContractionGraph<'a>)> {
        let (node, other_nodes) = self.nodes.split_first_mut()?;
        let subgraph = PartialContractionGraph {
            nodes: other_nodes,
            id_offset: self.id_offset + 1,
        };
        Some((node, subgraph))
    }
}

impl Index<usize> for PartialContractionGraph<'_> {
    type Output = Node;

    fn index(&self, idx: usize) -> &Node {
        &self.nodes[idx - self.id_offset as usize]
    }
}

impl IndexMut<usize> for PartialContractionGraph<'_> {
    fn index_mut(&mut self, idx: usize) -> &mut Node {
        &mut self.nodes[idx - self.id_offset as usize]
    }
}

/// Upward adjacency array of the chordal completion, in rank space.
///
/// `head[first_out[r]..first_out[r + 1]]` are the ranks above `r` adjacent to `r`, sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChordalGraph {
    pub first_out: Vec<u32>,
    pub head: Vec<u32>,
}

impl ChordalGraph {
    pub fn node_count(&self) -> usize {
        self.first_out.len() - 1
    }

    pub fn arc_count(&self) -> usize {
        self.head.len()
    }

    pub fn neighbors(&self, rank: u32) -> &[u32] {
        &self.head[self.first_out[rank as usize] as usize..self.first_out[rank as usize + 1] as usize]
    }

    /// Parent in the elimination tree: the lowest upward neighbor.
    pub fn elimination_tree_parent(&self, rank: u32) -> Option<u32> {
        self.neighbors(rank).first().copied()
    }
}

/// Triangulate the graph `tail`/`head` when nodes are eliminated by increasing `rank`.
///
/// Arcs are treated as undirected, loops and parallel arcs collapse. Inputs must already be validated.
/// Returns the completion together with the number of inserted fill-in arcs.
pub(crate) fn chordal_completion(rank: &[u32], tail: &[u32], head: &[u32]) -> (ChordalGraph, usize) {
    let n = rank.len();
    let mut nodes: Vec<Node> = (0..n).map(|_| Node::default()).collect();
    for (&u, &v) in tail.iter().zip(head) {
        let (ru, rv) = (rank[u as usize], rank[v as usize]);
        match ru.cmp(&rv) {
            Ordering::Less => nodes[ru as usize].edges.push(rv),
            Ordering::Greater => nodes[rv as usize].edges.push(ru),
            Ordering::Equal => (),
        }
    }
    let mut input_arc_count = 0;
    for node in &mut nodes {
        node.edges.sort_unstable();
        node.edges.dedup();
        input_arc_count += node.edges.len();
    }

    let mut num_shortcut_arcs = 0;
    let mut graph = PartialContractionGraph {
        nodes: &mut nodes[..],
        id_offset: 0,
    };
    // split of the lowest node, the one that will be contracted
    while let Some((node, mut subgraph)) = graph.remove_lowest() {
        if let Some((&lowest_neighbor, other_neighbors)) = node.edges.split_first() {
            let prev_deg = subgraph[lowest_neighbor as usize].edges.len();
            subgraph[lowest_neighbor as usize].merge_neighbors(other_neighbors);
            num_shortcut_arcs += subgraph[lowest_neighbor as usize].edges.len() - prev_deg;
        }
        graph = subgraph;
    }
    debug_assert_eq!(
        nodes.iter().map(|node| node.edges.len()).sum::<usize>(),
        input_arc_count + num_shortcut_arcs
    );

    let mut first_out = Vec::with_capacity(n + 1);
    first_out.push(0u32);
    let mut flat = Vec::with_capacity(input_arc_count + num_shortcut_arcs);
    for node in nodes {
        flat.extend(node.edges);
        first_out.push(flat.len() as u32);
    }

    (ChordalGraph { first_out, head: flat }, num_shortcut_arcs)
}
