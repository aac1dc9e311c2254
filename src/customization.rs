//! Metric dependent preprocessing: turning input arc weights into upward and downward CCH weights.

use crate::cch::{CCHStructure, INVALID_ID};
use crate::{INFINITY, Weight};
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Weight of a path over two arcs, clamped at [`INFINITY`].
#[inline(always)]
pub(crate) fn link(first: Weight, second: Weight) -> Weight {
    first.saturating_add(second)
}

// Customized (upward, downward) weight of `arc`, given that all arcs with a lower tail are final.
//
// For `arc = (x, y)` and a lower triangle `(v, x), (v, y)`:
// x -> y can take x -> v -> y, which is down(first) + up(second),
// y -> x can take y -> v -> x, which is down(second) + up(first).
#[inline]
fn customize_arc(cch: &CCHStructure, input: &[Weight], up: &[Weight], down: &[Weight], arc: usize) -> (Weight, Weight) {
    let mut up_weight = cch
        .up_inputs(arc)
        .iter()
        .map(|&input_arc| input[input_arc as usize])
        .min()
        .unwrap_or(INFINITY);
    let mut down_weight = cch
        .down_inputs(arc)
        .iter()
        .map(|&input_arc| input[input_arc as usize])
        .min()
        .unwrap_or(INFINITY);

    for triangle in cch.lower_triangles(arc) {
        let (first, second) = (triangle.first as usize, triangle.second as usize);
        up_weight = up_weight.min(link(down[first], up[second]));
        down_weight = down_weight.min(link(up[first], down[second]));
    }

    (up_weight, down_weight)
}

/// Customize all arcs in order of their ids.
pub(crate) fn customize(cch: &CCHStructure, input: &[Weight], up: &mut [Weight], down: &mut [Weight]) {
    debug_assert_eq!(input.len(), cch.input_arc_count());
    let start = Instant::now();
    for arc in 0..cch.cch_arc_count() {
        let (up_weight, down_weight) = customize_arc(cch, input, up, down, arc);
        up[arc] = up_weight;
        down[arc] = down_weight;
    }
    log::debug!(
        "customized {} arcs in {}ms",
        cch.cch_arc_count(),
        start.elapsed().as_millis()
    );
}

/// Customize level by level of the elimination tree; nodes of one level never depend on each other.
///
/// `thread_count == 0` uses the current rayon pool. Results are identical to [`customize`],
/// every arc is computed from the same inputs by the same kernel.
pub(crate) fn parallel_customize(
    cch: &CCHStructure,
    input: &[Weight],
    up: &mut [Weight],
    down: &mut [Weight],
    thread_count: u32,
) {
    debug_assert_eq!(input.len(), cch.input_arc_count());
    let start = Instant::now();

    let mut run = move || {
        for level in 0..cch.level_count() {
            let customized: Vec<(usize, Weight, Weight)> = {
                let (up, down) = (&*up, &*down);
                cch.level(level)
                    .par_iter()
                    .flat_map_iter(|&node| {
                        cch.up_arcs(node).map(move |arc| {
                            let (up_weight, down_weight) = customize_arc(cch, input, up, down, arc);
                            (arc, up_weight, down_weight)
                        })
                    })
                    .collect()
            };
            for (arc, up_weight, down_weight) in customized {
                up[arc] = up_weight;
                down[arc] = down_weight;
            }
        }
    };

    if thread_count == 0 {
        run();
    } else {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count as usize)
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(err) => {
                log::warn!("could not create a pool of {thread_count} threads ({err}), using the global pool");
                run();
            }
        }
    }

    log::debug!(
        "customized {} arcs over {} levels with {} threads in {}ms",
        cch.cch_arc_count(),
        cch.level_count(),
        if thread_count == 0 {
            rayon::current_num_threads()
        } else {
            thread_count as usize
        },
        start.elapsed().as_millis()
    );
}

/// Scratch state to recustomize only the arcs affected by a few changed input arcs.
///
/// Dirty arcs are processed by increasing id. An arc whose weights change makes every arc it
/// forms a lower triangle for dirty as well; all of those have larger ids.
#[derive(Debug)]
pub(crate) struct PartialCustomization {
    dirty_inputs: Vec<u32>,
    is_dirty_input: Vec<bool>,
    queue: BinaryHeap<Reverse<u32>>,
    queued: Vec<bool>,
}

impl PartialCustomization {
    pub fn new(cch: &CCHStructure) -> Self {
        PartialCustomization {
            dirty_inputs: Vec::new(),
            is_dirty_input: vec![false; cch.input_arc_count()],
            queue: BinaryHeap::new(),
            queued: vec![false; cch.cch_arc_count()],
        }
    }

    pub fn reset(&mut self) {
        for arc in self.dirty_inputs.drain(..) {
            self.is_dirty_input[arc as usize] = false;
        }
    }

    pub fn update_arc(&mut self, input_arc: u32) {
        debug_assert!((input_arc as usize) < self.is_dirty_input.len());
        if !std::mem::replace(&mut self.is_dirty_input[input_arc as usize], true) {
            self.dirty_inputs.push(input_arc);
        }
    }

    fn push(&mut self, arc: u32) {
        if !std::mem::replace(&mut self.queued[arc as usize], true) {
            self.queue.push(Reverse(arc));
        }
    }

    /// Bring `up` and `down` in line with `input` again. Returns the number of recomputed arcs.
    pub fn customize(&mut self, cch: &CCHStructure, input: &[Weight], up: &mut [Weight], down: &mut [Weight]) -> usize {
        let start = Instant::now();
        for idx in 0..self.dirty_inputs.len() {
            let cch_arc = cch.input_to_cch[self.dirty_inputs[idx] as usize];
            if cch_arc != INVALID_ID {
                self.push(cch_arc);
            }
        }

        let mut recomputed = 0;
        let mut changed = 0;
        while let Some(Reverse(arc)) = self.queue.pop() {
            self.queued[arc as usize] = false;
            recomputed += 1;

            let weights = customize_arc(cch, input, up, down, arc as usize);
            if weights == (up[arc as usize], down[arc as usize]) {
                continue;
            }
            changed += 1;
            up[arc as usize] = weights.0;
            down[arc as usize] = weights.1;

            let (bottom, top) = (cch.tail[arc as usize], cch.head[arc as usize]);
            for &other in cch.neighbors(bottom) {
                if other == top {
                    continue;
                }
                if let Some(dependent) = cch.arc_between(top.min(other), top.max(other)) {
                    self.push(dependent);
                }
            }
        }

        log::debug!(
            "partial customization: {} dirty input arcs, {recomputed} arcs recomputed, {changed} changed in {}us",
            self.dirty_inputs.len(),
            start.elapsed().as_micros()
        );
        recomputed
    }
}
