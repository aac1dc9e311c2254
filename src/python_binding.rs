use crate::{
    CCH, CCHMetric, CCHMetricPartialUpdater, CCHQuery, CHQuery, ContractionHierarchy, Error, Result, Weight,
    compute_order_degree, compute_order_inertial,
};
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

impl From<Error> for PyErr {
    fn from(err: Error) -> PyErr {
        match err {
            Error::InvalidInput(_) => PyValueError::new_err(err.to_string()),
            Error::InvalidState(_) => PyRuntimeError::new_err(err.to_string()),
            Error::Io(_) => PyIOError::new_err(err.to_string()),
        }
    }
}

/// The operations both query objects share, so the Python classes can drive either.
trait Engine: Send {
    fn reset(&mut self);
    fn add_source(&mut self, s: u32, dist: Weight) -> Result<()>;
    fn add_target(&mut self, t: u32, dist: Weight) -> Result<()>;
    fn pin_sources(&mut self, sources: &[u32]) -> Result<()>;
    fn pin_targets(&mut self, targets: &[u32]) -> Result<()>;
    fn run(&mut self) -> Result<()>;
    fn run_to_pinned_targets(&mut self) -> Result<()>;
    fn distance(&self) -> Result<Option<Weight>>;
    fn node_path(&self) -> Result<Vec<u32>>;
    fn arc_path(&self) -> Result<Vec<u32>>;
    fn distances_to_targets(&self) -> Result<Vec<Weight>>;
    fn phast_to_targets(&mut self, source: u32, targets: &[u32]) -> Result<Vec<Weight>>;
}

macro_rules! impl_engine {
    ($ty:ty) => {
        impl Engine for $ty {
            fn reset(&mut self) {
                <$ty>::reset(self)
            }
            fn add_source(&mut self, s: u32, dist: Weight) -> Result<()> {
                <$ty>::add_source(self, s, dist)
            }
            fn add_target(&mut self, t: u32, dist: Weight) -> Result<()> {
                <$ty>::add_target(self, t, dist)
            }
            fn pin_sources(&mut self, sources: &[u32]) -> Result<()> {
                <$ty>::pin_sources(self, sources)
            }
            fn pin_targets(&mut self, targets: &[u32]) -> Result<()> {
                <$ty>::pin_targets(self, targets)
            }
            fn run(&mut self) -> Result<()> {
                <$ty>::run(self)
            }
            fn run_to_pinned_targets(&mut self) -> Result<()> {
                <$ty>::run_to_pinned_targets(self)
            }
            fn distance(&self) -> Result<Option<Weight>> {
                <$ty>::distance(self)
            }
            fn node_path(&self) -> Result<Vec<u32>> {
                <$ty>::node_path(self)
            }
            fn arc_path(&self) -> Result<Vec<u32>> {
                <$ty>::arc_path(self)
            }
            fn distances_to_targets(&self) -> Result<Vec<Weight>> {
                <$ty>::distances_to_targets(self)
            }
            fn phast_to_targets(&mut self, source: u32, targets: &[u32]) -> Result<Vec<Weight>> {
                <$ty>::phast_to_targets(self, source, targets)
            }
        }
    };
}

impl_engine!(CCHQuery<'static>);
impl_engine!(CHQuery<'static>);

fn point_to_point(
    py: Python,
    query: &mut impl Engine,
    sources: Vec<(u32, u32)>,
    targets: Vec<(u32, u32)>,
) -> PyResult<PyQueryResult> {
    let result = py.detach(|| -> Result<PyQueryResult> {
        query.reset();
        for (s, d) in sources {
            query.add_source(s, d)?;
        }
        for (t, d) in targets {
            query.add_target(t, d)?;
        }
        query.run()?;
        Ok(PyQueryResult {
            distance: query.distance()?,
            node_path: query.node_path()?,
            arc_path: query.arc_path()?,
        })
    })?;
    Ok(result)
}

/// Row-major table, unreachable pairs stay `INFINITY`.
fn many_to_many(py: Python, query: &mut impl Engine, sources: Vec<u32>, targets: Vec<u32>) -> PyResult<Vec<Vec<u32>>> {
    let flat = py.detach(|| -> Result<Vec<Weight>> {
        query.reset();
        query.pin_sources(&sources)?;
        query.pin_targets(&targets)?;
        query.run_to_pinned_targets()?;
        query.distances_to_targets()
    })?;
    Ok(flat.chunks(targets.len().max(1)).map(<[u32]>::to_vec).collect())
}

#[pyfunction]
#[pyo3(name = "compute_order_degree")]
fn py_compute_order_degree(node_count: u32, tail: Vec<u32>, head: Vec<u32>) -> PyResult<Vec<u32>> {
    Ok(compute_order_degree(node_count, &tail, &head)?)
}

#[pyfunction]
#[pyo3(name = "compute_order_inertial")]
fn py_compute_order_inertial(
    node_count: u32,
    tail: Vec<u32>,
    head: Vec<u32>,
    latitude: Vec<f32>,
    longitude: Vec<f32>,
) -> PyResult<Vec<u32>> {
    Ok(compute_order_inertial(node_count, &tail, &head, &latitude, &longitude)?)
}

#[pyclass(frozen)]
#[pyo3(name = "CCH")]
struct PyCCH(Arc<CCH>);

#[pymethods]
impl PyCCH {
    #[new]
    #[pyo3(signature = (order, tail, head, filter_always_inf_arcs = false))]
    fn new(py: Python, order: Vec<u32>, tail: Vec<u32>, head: Vec<u32>, filter_always_inf_arcs: bool) -> PyResult<Self> {
        let cch = py.detach(|| CCH::new(&order, &tail, &head, |msg| log::info!("{msg}"), filter_always_inf_arcs))?;
        Ok(Self(Arc::new(cch)))
    }

    #[getter]
    fn node_count(&self) -> usize {
        self.0.node_count()
    }

    #[getter]
    fn cch_arc_count(&self) -> usize {
        self.0.cch_arc_count()
    }

    #[getter]
    fn order(&self) -> Vec<u32> {
        self.0.order().to_vec()
    }

    fn rank(&self, node: u32) -> Option<u32> {
        self.0.rank(node)
    }

    fn elimination_tree_parent(&self, node: u32) -> Option<u32> {
        self.0.elimination_tree_parent(node)
    }
}

#[pyclass]
#[pyo3(name = "CCHMetric")]
struct PyCCHMetric {
    // declared first so it drops before the CCH it points into
    inner: Arc<CCHMetric<'static>>,
    _cch: Arc<CCH>,
}

#[pymethods]
impl PyCCHMetric {
    #[new]
    #[pyo3(signature = (cch, weights, thread_count = None))]
    fn new(py: Python, cch: &PyCCH, weights: Vec<u32>, thread_count: Option<u32>) -> PyResult<Self> {
        let owner = cch.0.clone();
        // SAFETY: `_cch` keeps the CCH alive for as long as the metric exists
        let cch_ref: &'static CCH = unsafe { &*Arc::as_ptr(&owner) };
        let metric = py.detach(|| match thread_count {
            Some(threads) => CCHMetric::parallel_new(cch_ref, weights, threads),
            None => CCHMetric::new(cch_ref, weights),
        })?;
        Ok(Self {
            inner: Arc::new(metric),
            _cch: owner,
        })
    }

    #[getter]
    fn weights(&self) -> Vec<u32> {
        self.inner.weights().to_vec()
    }

    fn build_perfect_ch(&self, py: Python) -> PyContractionHierarchy {
        let metric = &self.inner;
        PyContractionHierarchy(Arc::new(py.detach(|| metric.build_perfect_ch())))
    }
}

#[pyclass(unsendable)]
#[pyo3(name = "CCHMetricPartialUpdater")]
struct PyCCHMetricPartialUpdater {
    inner: CCHMetricPartialUpdater<'static>,
    _cch: Arc<CCH>,
}

#[pymethods]
impl PyCCHMetricPartialUpdater {
    #[new]
    fn new(cch: &PyCCH) -> Self {
        let owner = cch.0.clone();
        // SAFETY: as in `CCHMetric.__new__`
        let cch_ref: &'static CCH = unsafe { &*Arc::as_ptr(&owner) };
        Self {
            inner: CCHMetricPartialUpdater::new(cch_ref),
            _cch: owner,
        }
    }

    fn apply(&mut self, metric: &mut PyCCHMetric, updates: HashMap<u32, u32>) -> PyResult<()> {
        let metric = Arc::get_mut(&mut metric.inner)
            .ok_or_else(|| PyRuntimeError::new_err("cannot update CCHMetric: a query still uses it"))?;
        Ok(self.inner.apply(metric, &updates)?)
    }
}

#[pyclass(unsendable)]
#[pyo3(name = "CCHQuery")]
struct PyCCHQuery {
    // drops before the metric it borrows
    inner: CCHQuery<'static>,
    _metric: Arc<CCHMetric<'static>>,
}

#[pymethods]
impl PyCCHQuery {
    #[new]
    fn new(metric: &PyCCHMetric) -> Self {
        // SAFETY: `_metric` keeps the metric alive and unmodifiable while the query exists
        let metric_ref: &'static CCHMetric<'static> = unsafe { &*Arc::as_ptr(&metric.inner) };
        Self {
            inner: CCHQuery::new(metric_ref),
            _metric: metric.inner.clone(),
        }
    }

    fn run(&mut self, py: Python, source: u32, target: u32) -> PyResult<PyQueryResult> {
        point_to_point(py, &mut self.inner, vec![(source, 0)], vec![(target, 0)])
    }

    fn run_multi_st_with_dist(
        &mut self,
        py: Python,
        sources: Vec<(u32, u32)>,
        targets: Vec<(u32, u32)>,
    ) -> PyResult<PyQueryResult> {
        point_to_point(py, &mut self.inner, sources, targets)
    }

    fn many_to_many(&mut self, py: Python, sources: Vec<u32>, targets: Vec<u32>) -> PyResult<Vec<Vec<u32>>> {
        many_to_many(py, &mut self.inner, sources, targets)
    }

    fn phast_to_targets(&mut self, py: Python, source: u32, targets: Vec<u32>) -> PyResult<Vec<u32>> {
        let query = &mut self.inner;
        Ok(py.detach(|| Engine::phast_to_targets(query, source, &targets))?)
    }
}

#[pyclass(frozen)]
#[pyo3(name = "ContractionHierarchy")]
struct PyContractionHierarchy(Arc<ContractionHierarchy>);

#[pymethods]
impl PyContractionHierarchy {
    #[new]
    #[pyo3(signature = (node_count, tail, head, weight, max_pop_count = 0))]
    fn new(
        py: Python,
        node_count: u32,
        tail: Vec<u32>,
        head: Vec<u32>,
        weight: Vec<u32>,
        max_pop_count: u32,
    ) -> PyResult<Self> {
        let ch = py.detach(|| {
            ContractionHierarchy::build(node_count, &tail, &head, &weight, |msg| log::info!("{msg}"), max_pop_count)
        })?;
        Ok(Self(Arc::new(ch)))
    }

    #[staticmethod]
    fn load(py: Python, path: PathBuf) -> PyResult<Self> {
        let ch = py.detach(|| ContractionHierarchy::load_file(&path))?;
        Ok(Self(Arc::new(ch)))
    }

    fn save(&self, py: Python, path: PathBuf) -> PyResult<()> {
        let ch = &self.0;
        Ok(py.detach(|| ch.save_file(&path))?)
    }

    #[getter]
    fn node_count(&self) -> usize {
        self.0.node_count()
    }

    #[getter]
    fn arc_count(&self) -> usize {
        self.0.arc_count()
    }
}

#[pyclass(unsendable)]
#[pyo3(name = "CHQuery")]
struct PyCHQuery {
    inner: CHQuery<'static>,
    _ch: Arc<ContractionHierarchy>,
}

#[pymethods]
impl PyCHQuery {
    #[new]
    fn new(ch: &PyContractionHierarchy) -> Self {
        // SAFETY: `_ch` keeps the hierarchy alive while the query exists
        let ch_ref: &'static ContractionHierarchy = unsafe { &*Arc::as_ptr(&ch.0) };
        Self {
            inner: CHQuery::new(ch_ref),
            _ch: ch.0.clone(),
        }
    }

    fn run(&mut self, py: Python, source: u32, target: u32) -> PyResult<PyQueryResult> {
        point_to_point(py, &mut self.inner, vec![(source, 0)], vec![(target, 0)])
    }

    fn run_multi_st_with_dist(
        &mut self,
        py: Python,
        sources: Vec<(u32, u32)>,
        targets: Vec<(u32, u32)>,
    ) -> PyResult<PyQueryResult> {
        point_to_point(py, &mut self.inner, sources, targets)
    }

    fn many_to_many(&mut self, py: Python, sources: Vec<u32>, targets: Vec<u32>) -> PyResult<Vec<Vec<u32>>> {
        many_to_many(py, &mut self.inner, sources, targets)
    }
}

/// Snapshot of one point-to-point run.
#[pyclass(frozen)]
#[pyo3(name = "CCHQueryResult")]
struct PyQueryResult {
    distance: Option<u32>,
    node_path: Vec<u32>,
    arc_path: Vec<u32>,
}

#[pymethods]
impl PyQueryResult {
    #[getter]
    fn distance(&self) -> Option<u32> {
        self.distance
    }

    #[getter]
    fn node_path(&self) -> Vec<u32> {
        self.node_path.clone()
    }

    #[getter]
    fn arc_path(&self) -> Vec<u32> {
        self.arc_path.clone()
    }
}

#[pymodule]
mod road_cch {
    #[pymodule_export]
    use super::PyCCH;
    #[pymodule_export]
    use super::PyCCHMetric;
    #[pymodule_export]
    use super::PyCCHMetricPartialUpdater;
    #[pymodule_export]
    use super::PyCCHQuery;
    #[pymodule_export]
    use super::PyQueryResult;
    #[pymodule_export]
    use super::PyContractionHierarchy;
    #[pymodule_export]
    use super::PyCHQuery;
    #[pymodule_export]
    use super::py_compute_order_degree;
    #[pymodule_export]
    use super::py_compute_order_inertial;
}
