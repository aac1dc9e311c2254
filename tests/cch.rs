use indicatif::{MultiProgress, ProgressBar, ProgressIterator};
use pathfinding::prelude::{dijkstra, dijkstra_all};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use road_cch::{
    CCH, CCHMetric, CCHMetricPartialUpdater, CCHPartialCustomization, CCHQuery, Error, INFINITY,
    compute_order_degree, compute_order_inertial, shp_utils,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::LazyLock,
};

static STYLE: LazyLock<indicatif::ProgressStyle> = LazyLock::new(|| {
    indicatif::ProgressStyle::with_template(
        "{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
    )
    .unwrap()
});

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Graph {
    n: u32,
    tail: Vec<u32>,
    head: Vec<u32>,
    weight: Vec<u32>,
    lat: Vec<f32>,
    lon: Vec<f32>,
}

/// Random multigraph with loops, parallel arcs and a few absent (infinite) arcs.
fn random_graph(rng: &mut StdRng, n: u32, m: usize) -> Graph {
    let tail: Vec<u32> = (0..m).map(|_| rng.gen_range(0..n)).collect();
    let head: Vec<u32> = (0..m).map(|_| rng.gen_range(0..n)).collect();
    let weight = (0..m)
        .map(|_| {
            if rng.gen_bool(0.05) {
                INFINITY
            } else {
                rng.gen_range(1..=100)
            }
        })
        .collect();
    let lat = (0..n).map(|_| rng.gen_range(39.0..41.0)).collect();
    let lon = (0..n).map(|_| rng.gen_range(116.0..117.0)).collect();
    Graph {
        n,
        tail,
        head,
        weight,
        lat,
        lon,
    }
}

/// Reference distances with the pathfinding crate.
struct Reference {
    adj: Vec<Vec<(u32, u32)>>,
}

impl Reference {
    fn new(n: u32, tail: &[u32], head: &[u32], weight: &[u32]) -> Self {
        let mut adj = vec![Vec::new(); n as usize];
        for i in 0..tail.len() {
            if weight[i] != INFINITY {
                adj[tail[i] as usize].push((head[i], weight[i]));
            }
        }
        Reference { adj }
    }

    fn distances_from(&self, s: u32) -> Vec<Option<u32>> {
        let all = dijkstra_all(&s, |&u| self.adj[u as usize].iter().copied());
        (0..self.adj.len() as u32)
            .map(|t| if t == s { Some(0) } else { all.get(&t).map(|&(_, cost)| cost) })
            .collect()
    }
}

fn check_path(graph: &Graph, s: u32, t: u32, dist: u32, node_path: &[u32], arc_path: &[u32]) {
    let sum: u64 = arc_path.iter().map(|&a| graph.weight[a as usize] as u64).sum();
    assert_eq!(sum, dist as u64, "arc path of {s} -> {t} does not add up");
    assert_eq!(node_path.len(), arc_path.len() + 1);
    assert_eq!(node_path.first(), Some(&s));
    assert_eq!(node_path.last(), Some(&t));
    for (i, &a) in arc_path.iter().enumerate() {
        assert_eq!(graph.tail[a as usize], node_path[i]);
        assert_eq!(graph.head[a as usize], node_path[i + 1]);
    }
}

fn distance(query: &mut CCHQuery, s: u32, t: u32) -> Option<u32> {
    query.reset();
    query.add_source(s, 0).unwrap();
    query.add_target(t, 0).unwrap();
    query.run().unwrap();
    query.distance().unwrap()
}

#[test]
fn line_graph() {
    let (tail, head) = (vec![0, 1, 2], vec![1, 2, 3]);
    let cch = CCH::new(&[0, 1, 2, 3], &tail, &head, |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, vec![5, 7, 3]).unwrap();
    let mut query = CCHQuery::new(&metric);
    query.add_source(0, 0).unwrap();
    query.add_target(3, 0).unwrap();
    query.run().unwrap();
    assert_eq!(query.distance().unwrap(), Some(15));
    assert_eq!(query.node_path().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(query.arc_path().unwrap(), vec![0, 1, 2]);
    // results are stable across repeated reads
    assert_eq!(query.node_path().unwrap(), vec![0, 1, 2, 3]);
    // one way only
    assert_eq!(distance(&mut query, 3, 0), None);
}

#[test]
fn triangle_prefers_two_cheap_arcs() {
    let (tail, head) = (vec![0, 1, 0], vec![1, 2, 2]);
    for order in [[0, 1, 2], [2, 1, 0], [1, 0, 2]] {
        let cch = CCH::new(&order, &tail, &head, |_| {}, false).unwrap();
        let metric = CCHMetric::new(&cch, vec![4, 4, 10]).unwrap();
        let mut query = CCHQuery::new(&metric);
        query.add_source(0, 0).unwrap();
        query.add_target(2, 0).unwrap();
        query.run().unwrap();
        assert_eq!(query.distance().unwrap(), Some(8), "order {order:?}");
        assert_eq!(query.node_path().unwrap(), vec![0, 1, 2]);
        assert_eq!(query.arc_path().unwrap(), vec![0, 1]);
    }
}

#[test]
fn many_to_many_tables() {
    let (tail, head) = (vec![0, 1, 2], vec![1, 2, 3]);
    let cch = CCH::new(&[0, 1, 2, 3], &tail, &head, |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, vec![5, 7, 3]).unwrap();

    let mut query = CCHQuery::new(&metric);
    query.pin_sources(&[0, 1]).unwrap();
    query.pin_targets(&[2, 3]).unwrap();
    query.run_to_pinned_targets().unwrap();
    assert_eq!(query.distances_to_targets().unwrap(), vec![12, 15, 7, 10]);

    let mut out = [0; 4];
    query.distances_to_targets_into(&mut out).unwrap();
    assert_eq!(out, [12, 15, 7, 10]);

    // target-major
    query.run_to_pinned_sources().unwrap();
    assert_eq!(query.distances_to_sources().unwrap(), vec![12, 7, 15, 10]);
    assert!(matches!(query.distances_to_targets(), Err(Error::InvalidState(_))));

    // added sources form a single frontier with their initial distances
    let mut query = CCHQuery::new(&metric);
    query.add_source(0, 0).unwrap();
    query.add_source(1, 3).unwrap();
    query.pin_targets(&[2, 3, 0, 2]).unwrap();
    query.run_to_pinned_targets().unwrap();
    assert_eq!(query.distances_to_targets().unwrap(), vec![10, 13, 0, 10]);

    // empty pinned set
    query.pin_targets(&[]).unwrap();
    query.run_to_pinned_targets().unwrap();
    assert!(query.distances_to_targets().unwrap().is_empty());
}

#[test]
fn partial_recustomization() {
    let (tail, head) = (vec![0, 1, 0], vec![1, 2, 2]);
    let cch = CCH::new(&[0, 1, 2], &tail, &head, |_| {}, false).unwrap();
    let mut metric = CCHMetric::new(&cch, vec![4, 4, 10]).unwrap();
    let mut partial = CCHPartialCustomization::new(&cch);

    metric.weights_mut()[1] = 100;
    partial.update_arc(1).unwrap();
    partial.customize(&mut metric).unwrap();

    let fresh = CCHMetric::new(&cch, vec![4, 100, 10]).unwrap();
    assert_eq!(metric.upward_weights(), fresh.upward_weights());
    assert_eq!(metric.downward_weights(), fresh.downward_weights());

    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 2), Some(10));
    assert_eq!(distance(&mut query, 0, 1), Some(4));
    assert_eq!(distance(&mut query, 1, 2), Some(100));
    assert_eq!(query.arc_path().unwrap(), vec![1]);

    assert!(matches!(partial.update_arc(3), Err(Error::InvalidInput(_))));
    let other_cch = CCH::new(&[0, 1, 2], &tail, &head, |_| {}, false).unwrap();
    let mut other = CCHMetric::new(&other_cch, vec![1, 1, 1]).unwrap();
    assert!(matches!(partial.customize(&mut other), Err(Error::InvalidState(_))));
}

#[test]
fn random_partial_updates_match_full_customization() {
    init_logger();
    let mut rng = StdRng::seed_from_u64(7);
    let graph = random_graph(&mut rng, 300, 1200);
    let order = compute_order_inertial(graph.n, &graph.tail, &graph.head, &graph.lat, &graph.lon).unwrap();
    let cch = CCH::new(&order, &graph.tail, &graph.head, |_| {}, false).unwrap();
    let mut metric = CCHMetric::new(&cch, graph.weight.clone()).unwrap();
    let mut partial = CCHPartialCustomization::new(&cch);

    for _ in 0..20 {
        partial.reset();
        for _ in 0..rng.gen_range(1..10) {
            let arc = rng.gen_range(0..graph.tail.len() as u32);
            metric.weights_mut()[arc as usize] = if rng.gen_bool(0.1) {
                INFINITY
            } else {
                rng.gen_range(1..=200)
            };
            partial.update_arc(arc).unwrap();
        }
        partial.customize(&mut metric).unwrap();

        let fresh = CCHMetric::new(&cch, metric.weights().to_vec()).unwrap();
        assert_eq!(metric.upward_weights(), fresh.upward_weights());
        assert_eq!(metric.downward_weights(), fresh.downward_weights());
    }
}

#[test]
fn parallel_customization_is_identical() {
    init_logger();
    let mut rng = StdRng::seed_from_u64(42);
    let graph = random_graph(&mut rng, 1000, 5000);
    let orders = [
        compute_order_degree(graph.n, &graph.tail, &graph.head).unwrap(),
        compute_order_inertial(graph.n, &graph.tail, &graph.head, &graph.lat, &graph.lon).unwrap(),
    ];
    for order in &orders {
        let cch = CCH::new(order, &graph.tail, &graph.head, |_| {}, false).unwrap();
        let sequential = CCHMetric::new(&cch, graph.weight.clone()).unwrap();
        for threads in [0, 1, 4] {
            let parallel = CCHMetric::parallel_new(&cch, graph.weight.clone(), threads).unwrap();
            assert_eq!(parallel.upward_weights(), sequential.upward_weights());
            assert_eq!(parallel.downward_weights(), sequential.downward_weights());
        }
    }
}

#[test]
fn random_graphs_match_dijkstra() {
    init_logger();
    let pb = ProgressBar::new(12);
    pb.set_prefix("random graphs");
    pb.set_style(STYLE.clone());
    for seed in (0..12u64).progress_with(pb) {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = rng.gen_range(1..80);
        let m = rng.gen_range(0..4 * n as usize);
        let graph = random_graph(&mut rng, n, m);
        let order = if seed % 2 == 0 {
            compute_order_inertial(graph.n, &graph.tail, &graph.head, &graph.lat, &graph.lon).unwrap()
        } else {
            compute_order_degree(graph.n, &graph.tail, &graph.head).unwrap()
        };
        let filter = seed % 3 == 0;
        let cch = CCH::new(&order, &graph.tail, &graph.head, |_| {}, filter).unwrap();
        if !filter {
            // every distinct undirected edge has its own CCH arc
            let edges: HashSet<(u32, u32)> = graph
                .tail
                .iter()
                .zip(&graph.head)
                .filter(|(t, h)| t != h)
                .map(|(&t, &h)| (t.min(h), t.max(h)))
                .collect();
            assert!(cch.cch_arc_count() >= edges.len());
        }
        let metric = CCHMetric::new(&cch, graph.weight.clone()).unwrap();
        let reference = Reference::new(graph.n, &graph.tail, &graph.head, &graph.weight);

        let mut query = CCHQuery::new(&metric);
        for s in 0..n {
            let expected = reference.distances_from(s);
            for t in 0..n {
                let dist = distance(&mut query, s, t);
                assert_eq!(dist, expected[t as usize], "seed {seed}: {s} -> {t}");
                match dist {
                    Some(d) => check_path(
                        &graph,
                        s,
                        t,
                        d,
                        &query.node_path().unwrap(),
                        &query.arc_path().unwrap(),
                    ),
                    None => {
                        assert!(query.node_path().unwrap().is_empty());
                        assert!(query.arc_path().unwrap().is_empty());
                    }
                }
            }
            let targets: Vec<u32> = (0..n).collect();
            let phast = query.phast_to_targets(s, &targets).unwrap();
            let expected: Vec<u32> = expected.iter().map(|d| d.unwrap_or(INFINITY)).collect();
            assert_eq!(phast, expected, "seed {seed}: phast from {s}");
        }
    }
}

#[test]
fn random_many_to_many_matches_dijkstra() {
    let mut rng = StdRng::seed_from_u64(3);
    let graph = random_graph(&mut rng, 150, 600);
    let order = compute_order_inertial(graph.n, &graph.tail, &graph.head, &graph.lat, &graph.lon).unwrap();
    let cch = CCH::new(&order, &graph.tail, &graph.head, |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, graph.weight.clone()).unwrap();
    let reference = Reference::new(graph.n, &graph.tail, &graph.head, &graph.weight);

    let sources: Vec<u32> = (0..12).map(|_| rng.gen_range(0..graph.n)).collect();
    let targets: Vec<u32> = (0..9).map(|_| rng.gen_range(0..graph.n)).collect();
    let mut query = CCHQuery::new(&metric);
    query.pin_sources(&sources).unwrap();
    query.pin_targets(&targets).unwrap();
    query.run_to_pinned_targets().unwrap();
    let to_targets = query.distances_to_targets().unwrap();
    query.run_to_pinned_sources().unwrap();
    let to_sources = query.distances_to_sources().unwrap();

    for (i, &s) in sources.iter().enumerate() {
        let expected = reference.distances_from(s);
        for (j, &t) in targets.iter().enumerate() {
            let expected = expected[t as usize].unwrap_or(INFINITY);
            assert_eq!(to_targets[i * targets.len() + j], expected, "{s} -> {t}");
            assert_eq!(to_sources[j * sources.len() + i], expected, "{s} -> {t}");
        }
    }
}

#[test]
fn filtering_keeps_distances() {
    let mut rng = StdRng::seed_from_u64(11);
    let graph = random_graph(&mut rng, 200, 500);
    let order = compute_order_inertial(graph.n, &graph.tail, &graph.head, &graph.lat, &graph.lon).unwrap();
    let plain = CCH::new(&order, &graph.tail, &graph.head, |_| {}, false).unwrap();
    let filtered = CCH::new(&order, &graph.tail, &graph.head, |_| {}, true).unwrap();
    assert!(filtered.cch_arc_count() <= plain.cch_arc_count());
    for v in 0..graph.n {
        assert_eq!(plain.elimination_tree_parent(v), filtered.elimination_tree_parent(v));
    }

    let plain_metric = CCHMetric::new(&plain, graph.weight.clone()).unwrap();
    let filtered_metric = CCHMetric::new(&filtered, graph.weight.clone()).unwrap();
    let mut plain_query = CCHQuery::new(&plain_metric);
    let mut filtered_query = CCHQuery::new(&filtered_metric);
    let targets: Vec<u32> = (0..graph.n).collect();
    for s in (0..graph.n).step_by(7) {
        assert_eq!(
            plain_query.phast_to_targets(s, &targets).unwrap(),
            filtered_query.phast_to_targets(s, &targets).unwrap()
        );
    }
}

#[test]
fn boundary_cases() {
    // a single node
    let cch = CCH::new(&[0], &[], &[], |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, vec![]).unwrap();
    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 0), Some(0));
    assert_eq!(query.node_path().unwrap(), vec![0]);
    assert!(query.arc_path().unwrap().is_empty());

    // no arcs
    let order = compute_order_degree(3, &[], &[]).unwrap();
    let cch = CCH::new(&order, &[], &[], |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, vec![]).unwrap();
    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 2), None);

    // all arcs absent
    let (tail, head) = (vec![0, 1, 0], vec![1, 2, 2]);
    let cch = CCH::new(&[0, 1, 2], &tail, &head, |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, vec![INFINITY; 3]).unwrap();
    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 2), None);
    assert_eq!(distance(&mut query, 1, 1), Some(0));

    // a single absent arc
    let metric = CCHMetric::new(&cch, vec![4, INFINITY, 10]).unwrap();
    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 2), Some(10));

    // path lengths saturate instead of wrapping around
    let metric = CCHMetric::new(&cch, vec![INFINITY - 1, INFINITY - 1, INFINITY]).unwrap();
    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 1), Some(INFINITY - 1));
    assert_eq!(distance(&mut query, 0, 2), None);

    // loops and parallel arcs
    let cch = CCH::new(&[1, 0], &[0, 0, 0, 1], &[0, 1, 1, 1], |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, vec![1, 9, 3, 1]).unwrap();
    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 1), Some(3));
    assert_eq!(query.arc_path().unwrap(), vec![2]);
}

#[test]
fn multiple_sources_and_targets_with_initial_distances() {
    let (tail, head) = (vec![0, 1, 2], vec![1, 2, 3]);
    let cch = CCH::new(&[3, 1, 0, 2], &tail, &head, |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, vec![5, 7, 3]).unwrap();
    let mut query = CCHQuery::new(&metric);
    query.add_source(0, 0).unwrap();
    query.add_source(2, 20).unwrap();
    query.add_target(3, 1).unwrap();
    query.run().unwrap();
    assert_eq!(query.distance().unwrap(), Some(16));
    assert_eq!(query.node_path().unwrap(), vec![0, 1, 2, 3]);

    // the second source gets better, the path starts there now
    query.reset_source();
    query.add_source(0, 0).unwrap();
    query.add_source(2, 2).unwrap();
    query.run().unwrap();
    assert_eq!(query.distance().unwrap(), Some(6));
    assert_eq!(query.node_path().unwrap(), vec![2, 3]);
    assert_eq!(query.arc_path().unwrap(), vec![2]);

    // targets are kept by reset_source and cleared by reset_target
    query.reset_target();
    assert!(matches!(query.run(), Err(Error::InvalidState(_))));
}

#[test]
fn invalid_calls_are_rejected() {
    let (tail, head) = (vec![0, 1, 0], vec![1, 2, 2]);
    assert!(matches!(
        CCH::new(&[0, 1, 1], &tail, &head, |_| {}, false),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        CCH::new(&[0, 1], &tail, &head, |_| {}, false),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        CCH::new(&[0, 1, 2], &tail, &head[..2], |_| {}, false),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        compute_order_inertial(3, &tail, &head, &[0.0; 3], &[0.0; 2]),
        Err(Error::InvalidInput(_))
    ));

    let cch = CCH::new(&[0, 1, 2], &tail, &head, |_| {}, false).unwrap();
    assert!(matches!(CCHMetric::new(&cch, vec![1, 2]), Err(Error::InvalidInput(_))));
    let mut metric = CCHMetric::new(&cch, vec![4, 4, 10]).unwrap();
    assert!(matches!(metric.replace_weights(vec![1]), Err(Error::InvalidInput(_))));
    assert_eq!(metric.weights(), &[4, 4, 10]);

    let mut query = CCHQuery::new(&metric);
    assert!(matches!(query.add_source(3, 0), Err(Error::InvalidInput(_))));
    assert!(matches!(query.add_target(0, INFINITY), Err(Error::InvalidInput(_))));
    assert!(matches!(query.pin_targets(&[0, 7]), Err(Error::InvalidInput(_))));
    assert!(matches!(query.phast_to_targets(0, &[5]), Err(Error::InvalidInput(_))));
    assert!(matches!(query.distance(), Err(Error::InvalidState(_))));
    assert!(matches!(query.node_path(), Err(Error::InvalidState(_))));
    assert!(matches!(query.run(), Err(Error::InvalidState(_))));
    assert!(matches!(query.run_to_pinned_targets(), Err(Error::InvalidState(_))));

    query.add_source(0, 0).unwrap();
    query.add_target(2, 0).unwrap();
    query.run().unwrap();
    assert!(matches!(query.distances_to_targets(), Err(Error::InvalidState(_))));
    // adding a source invalidates the result
    query.add_source(1, 0).unwrap();
    assert!(matches!(query.distance(), Err(Error::InvalidState(_))));

    query.pin_targets(&[1, 2]).unwrap();
    query.run_to_pinned_targets().unwrap();
    let mut short = [0; 1];
    assert!(matches!(
        query.distances_to_targets_into(&mut short),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(query.cch_arc_path(), Err(Error::InvalidState(_))));
}

#[test]
fn replace_weights_then_customize() {
    let (tail, head) = (vec![0, 1, 0], vec![1, 2, 2]);
    let cch = CCH::new(&[0, 1, 2], &tail, &head, |_| {}, false).unwrap();
    let mut metric = CCHMetric::new(&cch, vec![4, 4, 10]).unwrap();
    metric.replace_weights(vec![4, 4, 3]).unwrap();
    metric.parallel_customize(2);
    let mut query = CCHQuery::new(&metric);
    assert_eq!(distance(&mut query, 0, 2), Some(3));
}

#[test]
fn reset_with_metric_switches_weights() {
    let (tail, head) = (vec![0, 1, 0], vec![1, 2, 2]);
    let cch = CCH::new(&[0, 1, 2], &tail, &head, |_| {}, false).unwrap();
    let metric_a = CCHMetric::new(&cch, vec![4, 4, 10]).unwrap();
    let metric_b = CCHMetric::new(&cch, vec![4, 40, 10]).unwrap();
    let mut query = CCHQuery::new(&metric_a);
    assert_eq!(distance(&mut query, 0, 2), Some(8));
    query.reset_with_metric(&metric_b).unwrap();
    assert_eq!(distance(&mut query, 0, 2), Some(10));

    let other_cch = CCH::new(&[0, 1, 2], &tail, &head, |_| {}, false).unwrap();
    let other = CCHMetric::new(&other_cch, vec![1, 1, 1]).unwrap();
    assert!(matches!(query.reset_with_metric(&other), Err(Error::InvalidState(_))));
}

#[test]
fn cch_arc_path_under_another_metric() {
    let order = vec![3u32, 2, 1, 0, 4, 5, 6];
    let tail = vec![0u32, 1, 2, 3, 4, 5, 6];
    let head = vec![1u32, 2, 3, 4, 5, 6, 0];
    let cch = CCH::new(&order, &tail, &head, |_| {}, false).unwrap();
    let metric_a = CCHMetric::new(&cch, vec![1, 1, 3, 1, 5, 3, 1]).unwrap();
    let metric_b = CCHMetric::new(&cch, vec![2; 7]).unwrap();

    let mut query = CCHQuery::new(&metric_a);
    assert_eq!(distance(&mut query, 0, 6), Some(14));
    let path = query.cch_arc_path().unwrap();
    assert_eq!(metric_a.weight_of_cch_arc_path(&path).unwrap(), 14);
    assert_eq!(metric_a.unpack_cch_arc_path(&path).unwrap(), query.arc_path().unwrap());

    // the only route, priced with the other weights
    assert_eq!(metric_b.weight_of_cch_arc_path(&path).unwrap(), 12);
    assert_eq!(metric_b.unpack_cch_arc_path(&path).unwrap(), vec![0, 1, 2, 3, 4, 5]);

    let metric_c = CCHMetric::new(&cch, vec![2, 2, INFINITY, 2, 2, 2, 2]).unwrap();
    assert_eq!(metric_c.weight_of_cch_arc_path(&path).unwrap(), INFINITY);
    assert!(matches!(metric_c.unpack_cch_arc_path(&path), Err(Error::InvalidInput(_))));
    let bogus = [road_cch::CCHArc {
        id: cch.cch_arc_count() as u32,
        upward: true,
    }];
    assert!(matches!(metric_a.weight_of_cch_arc_path(&bogus), Err(Error::InvalidInput(_))));
}

#[test]
fn parallel_queries_share_a_metric() {
    let mut rng = StdRng::seed_from_u64(5);
    let graph = random_graph(&mut rng, 400, 1600);
    let order = compute_order_inertial(graph.n, &graph.tail, &graph.head, &graph.lat, &graph.lon).unwrap();
    let cch = CCH::new(&order, &graph.tail, &graph.head, |_| {}, false).unwrap();
    let metric = CCHMetric::parallel_new(&cch, graph.weight.clone(), 0).unwrap();
    let reference = Reference::new(graph.n, &graph.tail, &graph.head, &graph.weight);

    let pairs: Vec<(u32, u32)> = (0..500)
        .map(|_| (rng.gen_range(0..graph.n), rng.gen_range(0..graph.n)))
        .collect();
    let parallel: Vec<Option<u32>> = pairs
        .par_iter()
        .map_init(|| CCHQuery::new(&metric), |query, &(s, t)| distance(query, s, t))
        .collect();
    for (&(s, t), dist) in pairs.iter().zip(parallel) {
        let expected = dijkstra(&s, |&u| reference.adj[u as usize].iter().copied(), |&u| u == t)
            .map(|(_, cost)| cost);
        assert_eq!(dist, expected, "{s} -> {t}");
    }
}

#[test]
fn perfect_ch_matches_cch() {
    let mut rng = StdRng::seed_from_u64(9);
    let graph = random_graph(&mut rng, 120, 480);
    let order = compute_order_inertial(graph.n, &graph.tail, &graph.head, &graph.lat, &graph.lon).unwrap();
    let cch = CCH::new(&order, &graph.tail, &graph.head, |_| {}, false).unwrap();
    let metric = CCHMetric::new(&cch, graph.weight.clone()).unwrap();
    let ch = metric.build_perfect_ch();
    assert_eq!(ch.order(), cch.order());
    assert!(ch.arc_count() <= 2 * cch.cch_arc_count());

    let mut cch_query = CCHQuery::new(&metric);
    let mut ch_query = road_cch::CHQuery::new(&ch);
    for s in (0..graph.n).step_by(3) {
        for t in (0..graph.n).step_by(5) {
            ch_query.reset();
            ch_query.add_source(s, 0).unwrap();
            ch_query.add_target(t, 0).unwrap();
            ch_query.run().unwrap();
            let dist = ch_query.distance().unwrap();
            assert_eq!(dist, distance(&mut cch_query, s, t), "{s} -> {t}");
            if let Some(d) = dist {
                check_path(
                    &graph,
                    s,
                    t,
                    d,
                    &ch_query.node_path().unwrap(),
                    &ch_query.arc_path().unwrap(),
                );
            }
        }
    }
}

#[test]
fn compare_with_pathfinding() {
    for city in ["beijing", "chengdu", "cityindia", "harbin", "porto"] {
        eprintln!("====\nComparing with pathfinding for city: {}\n====", city);
        let (Ok(edges), Ok(nodes)) = (
            shp_utils::load_edges(&format!("data/{city}_data/map/edges.shp")),
            shp_utils::load_nodes(&format!("data/{city}_data/map/nodes.shp")),
        ) else {
            eprintln!("Failed to load data for city: {}", city);
            continue;
        };
        let arrays = shp_utils::build_graph_arrays(&nodes, &edges).unwrap();
        let graph = arrays.to_routing_graph(1e3).unwrap();
        let osmid2idx = arrays
            .osmids
            .iter()
            .enumerate()
            .map(|(i, &osmid)| (osmid, i as u32))
            .collect::<HashMap<_, _>>();
        eprintln!("Graph has {} nodes, {} edges.", graph.node_count, graph.tail.len());

        eprintln!("Computing order...");
        let order = compute_order_inertial(
            graph.node_count,
            &graph.tail,
            &graph.head,
            &graph.latitude,
            &graph.longitude,
        )
        .unwrap();
        eprintln!("Building CCH...");
        let cch = CCH::new(&order, &graph.tail, &graph.head, |msg| eprintln!("{msg}"), false).unwrap();
        eprintln!("Building metric + customization...");
        let metric = CCHMetric::parallel_new(&cch, graph.weight.clone(), 0).unwrap();
        let reference = Reference::new(graph.node_count, &graph.tail, &graph.head, &graph.weight);

        eprintln!("Loading historical trips...");
        let Ok(file) = std::fs::File::open(format!("data/{city}_data/preprocessed_train_trips_all.pkl")) else {
            eprintln!("No trips for city: {}", city);
            continue;
        };
        let trips: Vec<(serde_pickle::Value, Vec<usize>, (usize, usize))> =
            serde_pickle::from_reader(file, Default::default()).unwrap();
        let pairs: Vec<(u32, u32)> = trips
            .iter()
            .filter_map(|(_, path, _)| {
                let (first, last) = (path.first()?, path.last()?);
                Some((osmid2idx[&edges[*first].u], osmid2idx[&edges[*last].v]))
            })
            .collect();

        eprintln!("Running {} queries...", pairs.len());
        let m = MultiProgress::new();
        let num_chunks = std::thread::available_parallelism()
            .map(|x| x.get())
            .unwrap_or(1);
        let num_digits = (num_chunks - 1).to_string().len();
        pairs
            .par_chunks(pairs.len().div_ceil(num_chunks).max(1))
            .enumerate()
            .for_each(|(chunk_id, chunk)| {
                let mut query = CCHQuery::new(&metric);
                let pb = m.add(ProgressBar::new(chunk.len() as u64));
                pb.set_prefix(format!("{city}-{:<num_digits$}", chunk_id));
                pb.set_style(STYLE.clone());
                for (i, &(s, t)) in chunk.iter().enumerate().progress_with(pb) {
                    let dist_cch = distance(&mut query, s, t);
                    let dist_ref = dijkstra(&s, |&u| reference.adj[u as usize].iter().copied(), |&u| u == t)
                        .map(|(_, cost)| cost);
                    assert_eq!(dist_cch, dist_ref, "distance mismatch on query #{i} s={s} t={t}");
                }
            });
    }
}

#[test]
fn partial_update_with_reusable_updater() {
    // 0->1 (5), 1->2 (7), 0->2 (20)
    let tail = vec![0, 1, 0];
    let head = vec![1, 2, 2];
    let weights = vec![5u32, 7u32, 20u32];
    let order = compute_order_degree(3, &tail, &head).unwrap();
    let cch = CCH::new(&order, &tail, &head, |_| {}, false).unwrap();
    let mut metric = CCHMetric::new(&cch, weights).unwrap();
    let mut updater = CCHMetricPartialUpdater::new(&cch);

    let shortest = |metric: &CCHMetric| {
        let mut q = CCHQuery::new(metric);
        distance(&mut q, 0, 2)
    };
    // Baseline shortest 0->2 is 12
    assert_eq!(shortest(&metric), Some(12));
    // 1) Increase 0->1 to 30 (direct 0->2 wins: 20)
    updater
        .apply(&mut metric, &HashMap::<u32, u32>::from_iter([(0, 30)]))
        .unwrap();
    assert_eq!(shortest(&metric), Some(20));
    assert_eq!(metric.weights(), vec![30, 7, 20]);
    // 2) Decrease 1->2 to 1 (path 0->1->2 becomes 31, still worse)
    updater.apply(&mut metric, &BTreeMap::from_iter([(1, 1)])).unwrap();
    assert_eq!(shortest(&metric), Some(20));
    assert_eq!(metric.weights(), vec![30, 1, 20]);
    // 3) Decrease 0->1 to 2 (now 2+1=3 wins)
    updater.apply(&mut metric, &BTreeMap::from_iter([(0, 2)])).unwrap();
    assert_eq!(shortest(&metric), Some(3));
    assert_eq!(metric.weights(), vec![2, 1, 20]);
    // 4) Batch update with duplicate keys: the last value of each key wins.
    updater
        .apply(
            &mut metric,
            &HashMap::<u32, u32>::from_iter([(0, 4), (0, 6), (1, 12), (1, 10)]),
        )
        .unwrap();
    assert_eq!(shortest(&metric), Some(16));
    assert_eq!(metric.weights(), vec![6, 10, 20]);

    // out of range arcs leave the metric untouched
    assert!(matches!(
        updater.apply(&mut metric, &BTreeMap::from_iter([(0, 1), (9, 1)])),
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(metric.weights(), vec![6, 10, 20]);
}
