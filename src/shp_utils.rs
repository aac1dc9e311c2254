//! Loading OSMnx style road networks from shapefiles (`nodes.shp` / `edges.shp`).

use crate::error::{Error, Result, invalid_input};
use crate::{INFINITY, Weight};
use shapefile::dbase::{FieldValue, Record};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct EdgeAttr {
    pub fid: u64,
    pub u: u64,
    pub v: u64,
    pub length: f64,
    pub highway: Option<String>,
    pub name: Option<String>,
    pub oneway: Option<String>,
    pub maxspeed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeAttr {
    pub osmid: u64,
    pub x: f64,
    pub y: f64,
    pub highway: Option<String>,
    pub r#ref: Option<String>,
}

/// Nodes and edges in index form, edge `i` goes from `tail[i]` to `head[i]`.
pub struct GraphArrays {
    pub osmids: Vec<u64>,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub tail: Vec<usize>,
    pub head: Vec<usize>,
    pub weight: Vec<f64>,
}

/// A graph ready for ordering, CCH construction and customization.
#[derive(Debug, Clone)]
pub struct RoutingGraph {
    pub node_count: u32,
    pub tail: Vec<u32>,
    pub head: Vec<u32>,
    pub weight: Vec<Weight>,
    pub latitude: Vec<f32>,
    pub longitude: Vec<f32>,
}

impl std::fmt::Debug for GraphArrays {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const SHOWN: usize = 5;
        fn preview<T: std::fmt::Debug>(f: &mut std::fmt::Formatter<'_>, name: &str, data: &[T]) -> std::fmt::Result {
            if data.len() <= 2 * SHOWN {
                write!(f, "\n{name}[len={}] = {:?}", data.len(), data)
            } else {
                write!(
                    f,
                    "\n{name}[len={}] front={:?} ... back={:?}",
                    data.len(),
                    &data[..SHOWN],
                    &data[data.len() - SHOWN..]
                )
            }
        }
        let (w_min, w_max, w_sum) = self
            .weight
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY, 0f64), |acc, &w| (acc.0.min(w), acc.1.max(w), acc.2 + w));
        let w_avg = if self.weight.is_empty() {
            0.0
        } else {
            w_sum / self.weight.len() as f64
        };
        write!(f, "GraphArrays summary: nodes={} edges={}", self.osmids.len(), self.tail.len())?;
        preview(f, "osmids", &self.osmids)?;
        preview(f, "x", &self.xs)?;
        preview(f, "y", &self.ys)?;
        preview(f, "tail", &self.tail)?;
        preview(f, "head", &self.head)?;
        preview(f, "weight", &self.weight)?;
        write!(f, "\nweight_stats: min={w_min:.3} max={w_max:.3} avg={w_avg:.3}")
    }
}

fn shapefile_error(err: shapefile::Error) -> Error {
    Error::Io(std::io::Error::other(err.to_string()))
}

trait RecordExt {
    fn num(&self, key: &str) -> Option<u64>;
    fn float(&self, key: &str) -> Option<f64>;
    fn string(&self, key: &str) -> Option<String>;
    fn require<T>(&self, value: Option<T>, key: &str, idx: usize, kind: &str) -> Result<T>;
}

impl RecordExt for Record {
    fn num(&self, key: &str) -> Option<u64> {
        self.float(key).map(|f| f as u64)
    }

    fn float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            FieldValue::Numeric(value) => *value,
            FieldValue::Float(value) => value.map(f64::from),
            FieldValue::Double(value) => Some(*value),
            FieldValue::Integer(value) => Some(f64::from(*value)),
            FieldValue::Character(Some(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            FieldValue::Character(Some(s)) => Some(s.trim().to_string()),
            _ => None,
        }
    }

    fn require<T>(&self, value: Option<T>, key: &str, idx: usize, kind: &str) -> Result<T> {
        value.ok_or_else(|| invalid_input(format!("missing required field '{key}' at {kind} record {idx}")))
    }
}

pub fn load_edges<P: AsRef<Path>>(path: &P) -> Result<Vec<EdgeAttr>> {
    let mut reader = shapefile::Reader::from_path(path).map_err(shapefile_error)?;
    let mut edges = Vec::new();
    for (idx, rec) in reader.iter_shapes_and_records().enumerate() {
        let (_shape, record) = rec.map_err(shapefile_error)?;
        edges.push(EdgeAttr {
            fid: record.require(record.num("fid"), "fid", idx, "edge")?,
            u: record.require(record.num("u"), "u", idx, "edge")?,
            v: record.require(record.num("v"), "v", idx, "edge")?,
            length: record.require(record.float("length"), "length", idx, "edge")?,
            highway: record.string("highway"),
            name: record.string("name"),
            oneway: record.string("oneway"),
            maxspeed: record.string("maxspeed"),
        });
    }
    Ok(edges)
}

/// Load point nodes, other geometries are skipped.
pub fn load_nodes<P: AsRef<Path>>(path: &P) -> Result<Vec<NodeAttr>> {
    let mut reader = shapefile::Reader::from_path(path).map_err(shapefile_error)?;
    let mut nodes = Vec::new();
    for (idx, rec) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = rec.map_err(shapefile_error)?;
        let (x, y) = match shape {
            shapefile::Shape::Point(p) => (p.x, p.y),
            shapefile::Shape::PointZ(p) => (p.x, p.y),
            _ => continue,
        };
        nodes.push(NodeAttr {
            osmid: record.require(record.num("osmid"), "osmid", idx, "node")?,
            x,
            y,
            highway: record.string("highway"),
            r#ref: record.string("ref"),
        });
    }
    Ok(nodes)
}

/// Number the nodes in file order and resolve the edge endpoints.
pub fn build_graph_arrays(nodes: &[NodeAttr], edges: &[EdgeAttr]) -> Result<GraphArrays> {
    let mut id_map = HashMap::with_capacity(nodes.len());
    let mut osmids = Vec::with_capacity(nodes.len());
    let mut xs = Vec::with_capacity(nodes.len());
    let mut ys = Vec::with_capacity(nodes.len());
    for (i, n) in nodes.iter().enumerate() {
        if id_map.insert(n.osmid, i).is_some() {
            return Err(invalid_input(format!("duplicate osmid {}", n.osmid)));
        }
        osmids.push(n.osmid);
        xs.push(n.x);
        ys.push(n.y);
    }

    let lookup = |osmid: u64, end: &str| {
        id_map
            .get(&osmid)
            .copied()
            .ok_or_else(|| invalid_input(format!("edge {end} osmid {osmid} not found")))
    };
    let mut tail = Vec::with_capacity(edges.len());
    let mut head = Vec::with_capacity(edges.len());
    let mut weight = Vec::with_capacity(edges.len());
    for e in edges {
        tail.push(lookup(e.u, "u")?);
        head.push(lookup(e.v, "v")?);
        weight.push(e.length);
    }
    Ok(GraphArrays {
        osmids,
        xs,
        ys,
        tail,
        head,
        weight,
    })
}

impl GraphArrays {
    /// Convert to `u32` ids and integer weights `round(weight * weight_scale)`.
    ///
    /// Weights are clamped below [`INFINITY`], so no edge disappears by accident.
    pub fn to_routing_graph(&self, weight_scale: f64) -> Result<RoutingGraph> {
        let node_count = u32::try_from(self.osmids.len())
            .map_err(|_| invalid_input(format!("{} nodes do not fit into u32 ids", self.osmids.len())))?;
        if !(weight_scale.is_finite() && weight_scale > 0.0) {
            return Err(invalid_input(format!("weight scale {weight_scale} is not positive")));
        }
        if let Some(w) = self.weight.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
            return Err(invalid_input(format!("edge weight {w} is not a finite non-negative number")));
        }
        let max_weight = f64::from(INFINITY - 1);
        Ok(RoutingGraph {
            node_count,
            tail: self.tail.iter().map(|&t| t as u32).collect(),
            head: self.head.iter().map(|&h| h as u32).collect(),
            weight: self
                .weight
                .iter()
                .map(|&w| (w * weight_scale).round().min(max_weight) as Weight)
                .collect(),
            latitude: self.ys.iter().map(|&y| y as f32).collect(),
            longitude: self.xs.iter().map(|&x| x as f32).collect(),
        })
    }
}
