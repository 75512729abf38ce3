use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::admittance::BranchPorts;

/// Bus types of the internal (solver) bus table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusKind {
    /// Angle reference, voltage fully fixed.
    Ref,
    /// Voltage magnitude fixed by a generator.
    PV,
    /// Fixed injections.
    PQ,
}

/// Which pandapower table a row of the internal generator table comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenSource {
    ExtGrid(usize),
    Gen(usize),
}

/// A row of the internal generator table.
///
/// External grids come first, then generators, in table order. After a solve
/// `p_mw` and `q_mvar` hold the computed injections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalGen {
    /// Internal bus row.
    pub bus: usize,
    pub source: GenSource,
    pub p_mw: f64,
    pub q_mvar: f64,
    pub vm_pu: f64,
    pub max_p_mw: Option<f64>,
    pub min_p_mw: Option<f64>,
    pub max_q_mvar: Option<f64>,
    pub min_q_mvar: Option<f64>,
}

/// The internal model a power flow runs on: only in-service buses and branches,
/// renumbered contiguously.
#[derive(Debug, Clone)]
pub struct PFNetwork {
    /// The base power of the network.
    pub s_base: f64,
    /// pandapower bus index -> internal row.
    pub bus_lookup: Vec<Option<usize>>,
    /// internal row -> pandapower bus index.
    pub internal_to_bus: Vec<usize>,
    pub kind: Vec<BusKind>,
    /// Voltage setpoints, `1+0j` for PQ buses.
    pub v_set: Vec<Complex64>,
    /// Scheduled injections (generation minus demand) in p.u.
    pub s_bus: DVector<Complex64>,
    /// Constant admittance shunts in p.u., indexed by internal row.
    pub y_shunt: Vec<Complex64>,
    /// Line models, `None` for rows that are out of service.
    pub line: Vec<Option<BranchPorts>>,
    /// Transformer models, `None` for rows that are out of service.
    pub trafo: Vec<Option<BranchPorts>>,
    pub internal_gen: Vec<InternalGen>,
}

impl PFNetwork {
    pub fn n_bus(&self) -> usize {
        self.internal_to_bus.len()
    }

    /// Iterates over every active branch, lines first.
    pub fn branches(&self) -> impl Iterator<Item = &BranchPorts> {
        self.line.iter().chain(self.trafo.iter()).flatten()
    }

    /// Indices of the buses of one kind, in internal order.
    pub fn buses_of(&self, kind: BusKind) -> Vec<usize> {
        (0..self.n_bus()).filter(|&i| self.kind[i] == kind).collect()
    }

    /// Creates the nodal admittance matrix (Ybus).
    ///
    /// Every diagonal entry is present in the pattern, even for buses without
    /// any connection, so that derivative patterns always contain the diagonal.
    pub fn create_y_bus(&self) -> CscMatrix<Complex64> {
        let n = self.n_bus();
        let mut coo = CooMatrix::new(n, n);
        for (i, y) in self.y_shunt.iter().enumerate() {
            coo.push(i, i, *y);
        }
        for br in self.branches() {
            coo.push(br.from, br.from, br.y.yff);
            coo.push(br.from, br.to, br.y.yft);
            coo.push(br.to, br.from, br.y.ytf);
            coo.push(br.to, br.to, br.y.ytt);
        }
        CscMatrix::from(&coo)
    }

    /// Computes `V .* conj(Ybus V)`, the complex power leaving each bus through the network.
    pub fn s_calc(y_bus: &CscMatrix<Complex64>, v: &DVector<Complex64>) -> DVector<Complex64> {
        let i = mul_ybus(y_bus, v);
        v.zip_map(&i, |v, i| v * i.conj())
    }
}

/// Sparse matrix by dense vector product on the triplets of `y_bus`.
pub fn mul_ybus(y_bus: &CscMatrix<Complex64>, v: &DVector<Complex64>) -> DVector<Complex64> {
    let mut out = DVector::from_element(v.len(), Complex64::zero());
    for (i, j, y) in y_bus.triplet_iter() {
        out[i] += y * v[j];
    }
    out
}
