use std::time::{Duration, Instant};

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::dcpf::dc_pf;
use super::newtonpf::newton_pf;
use super::solver::DefaultSolver;
use super::system::*;
use crate::error::ConvergenceFailure;
use crate::io::pandapower::{result_inputs, Network};

/// How the voltages are initialized before the Newton iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PfInit {
    /// Angles from a DC power flow, magnitudes from the setpoints.
    Dc,
    /// Flat start from the setpoints.
    Auto,
    /// Warm start from the voltages of a previous solve.
    Results,
}

/// Options of a single solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    pub init: PfInit,
    /// Solve the DC approximation instead of the AC equations.
    pub dc: bool,
    pub max_it: usize,
    pub tol: f64,
    /// Voltages per pandapower bus row, used with [`PfInit::Results`].
    pub warm_start: Option<Vec<Complex64>>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            init: PfInit::Auto,
            dc: false,
            max_it: 10,
            tol: 1e-8,
            warm_start: None,
        }
    }
}

/// Everything a converged solve produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerFlowOutput {
    pub results: PowerFlowResults,
    /// External grids first, then generators, with the solved injections.
    pub internal_gen: Vec<InternalGen>,
    /// pandapower bus row -> internal row.
    pub bus_lookup: Vec<Option<usize>>,
    /// internal row -> pandapower bus row.
    pub internal_to_bus: Vec<usize>,
    /// Complex voltage per pandapower bus row, NaN for buses left out of the solve.
    pub v_bus: Vec<Complex64>,
    pub iterations: usize,
    pub elapsed: Duration,
}

/// A power flow solver working on the pandapower tables.
pub trait PowerFlowEngine: Clone {
    fn solve(
        &mut self,
        net: &Network,
        opts: &SolveOptions,
    ) -> Result<PowerFlowOutput, ConvergenceFailure>;
}

/// Newton-Raphson AC power flow with a DC fallback mode, on sparse matrices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewtonEngine;

fn dc_voltages(pf: &PFNetwork) -> Result<DVector<Complex64>, ConvergenceFailure> {
    let theta = dc_pf(pf, &mut DefaultSolver::default())?;
    Ok(DVector::from_iterator(
        pf.n_bus(),
        pf.v_set
            .iter()
            .zip(theta.iter())
            .map(|(v, &a)| Complex64::from_polar(v.norm(), a)),
    ))
}

fn initial_voltages(
    pf: &PFNetwork,
    opts: &SolveOptions,
) -> Result<DVector<Complex64>, ConvergenceFailure> {
    match (opts.init, &opts.warm_start) {
        (PfInit::Dc, _) => dc_voltages(pf),
        (PfInit::Results, Some(warm)) => Ok(DVector::from_iterator(
            pf.n_bus(),
            (0..pf.n_bus()).map(|i| {
                let set = pf.v_set[i];
                let prev = warm
                    .get(pf.internal_to_bus[i])
                    .copied()
                    .filter(|v| v.is_finite());
                match (pf.kind[i], prev) {
                    (BusKind::Ref, _) | (_, None) => set,
                    (BusKind::PV, Some(v)) => Complex64::from_polar(set.norm(), v.arg()),
                    (BusKind::PQ, Some(v)) => v,
                }
            }),
        )),
        _ => Ok(DVector::from_column_slice(&pf.v_set)),
    }
}

impl PowerFlowEngine for NewtonEngine {
    fn solve(
        &mut self,
        net: &Network,
        opts: &SolveOptions,
    ) -> Result<PowerFlowOutput, ConvergenceFailure> {
        let start = Instant::now();
        let pf = PFNetwork::try_from(net)?;
        let y_bus = pf.create_y_bus();

        let (v, iterations) = if opts.dc {
            (dc_voltages(&pf)?, 1)
        } else {
            let v0 = initial_voltages(&pf, opts)?;
            let mut solver = DefaultSolver::default();
            newton_pf(
                &y_bus,
                &pf.s_bus,
                &v0,
                &pf.kind,
                opts.tol,
                opts.max_it,
                &mut solver,
            )?
        };

        let inputs = result_inputs(net, &pf, opts.dc);
        let results = pf.results(&y_bus, &v, &inputs);

        let mut internal_gen = pf.internal_gen.clone();
        for (row, res) in internal_gen.iter_mut().zip(&results.internal_gen) {
            row.p_mw = res.p_mw;
            row.q_mvar = res.q_mvar;
        }
        let mut v_bus = vec![Complex64::new(f64::NAN, f64::NAN); net.bus.len()];
        for (i, &b) in pf.internal_to_bus.iter().enumerate() {
            v_bus[b] = v[i];
        }

        let elapsed = start.elapsed();
        log::debug!(
            "power flow ({}) solved in {iterations} iterations, {elapsed:?}",
            if opts.dc { "dc" } else { "ac" }
        );
        Ok(PowerFlowOutput {
            results,
            internal_gen,
            bus_lookup: pf.bus_lookup,
            internal_to_bus: pf.internal_to_bus,
            v_bus,
            iterations,
            elapsed,
        })
    }
}
