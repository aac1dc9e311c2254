//! Example: evaluating a CCH level path found under one metric under another metric.
use road_cch::{CCH, CCHMetric, CCHQuery};

fn main() -> road_cch::Result<()> {
    // A directed cycle 0 -> 1 -> ... -> 6 -> 0
    let order = vec![3u32, 2, 1, 0, 4, 5, 6];
    let tail = vec![0u32, 1, 2, 3, 4, 5, 6];
    let head = vec![1u32, 2, 3, 4, 5, 6, 0];
    let weights_a = vec![1u32, 1, 3, 1, 5, 3, 1]; // metric A
    let weights_b = vec![2u32, 2, 2, 2, 2, 2, 2]; // metric B

    let cch = CCH::new(&order, &tail, &head, |msg| println!("{msg}"), false)?;

    let metric_a = CCHMetric::new(&cch, weights_a)?;
    let mut query = CCHQuery::new(&metric_a);
    query.add_source(0, 0)?;
    query.add_target(6, 0)?;
    query.run()?;
    let cch_arc_path = query.cch_arc_path()?;
    println!(
        "Metric A: distance={:?}, arc_path={:?}",
        query.distance()?,
        query.arc_path()?
    );
    println!("CCH arc path (shortcuts): {:?}", cch_arc_path);

    // Same CCH, different weights: no need to rerun the search to price the old route.
    let metric_b = CCHMetric::new(&cch, weights_b)?;
    println!(
        "Unpacked path under Metric B (without rerunning): {:?}",
        metric_b.unpack_cch_arc_path(&cch_arc_path)?
    );
    println!(
        "Weight of CCH-level path under Metric B (summed): {}",
        metric_b.weight_of_cch_arc_path(&cch_arc_path)?
    );
    Ok(())
}
