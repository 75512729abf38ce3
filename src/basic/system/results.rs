use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::admittance::BranchPorts;
use super::system::{BusKind, GenSource, PFNetwork};

/// Bus results, with the pandapower load sign convention for `p_mw`/`q_mvar`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusResult {
    pub vm_pu: f64,
    pub va_degree: f64,
    pub p_mw: f64,
    pub q_mvar: f64,
}

impl BusResult {
    pub const NAN: Self = Self {
        vm_pu: f64::NAN,
        va_degree: f64::NAN,
        p_mw: f64::NAN,
        q_mvar: f64::NAN,
    };
}

/// Injection results of a generator, load or shunt row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectionResult {
    pub p_mw: f64,
    pub q_mvar: f64,
}

impl InjectionResult {
    pub const NAN: Self = Self {
        p_mw: f64::NAN,
        q_mvar: f64::NAN,
    };
    pub const ZERO: Self = Self {
        p_mw: 0.0,
        q_mvar: 0.0,
    };
}

/// Flows at both ends of a line or transformer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchResult {
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub p_to_mw: f64,
    pub q_to_mvar: f64,
    pub i_from_ka: f64,
    pub i_to_ka: f64,
    pub vm_from_pu: f64,
    pub vm_to_pu: f64,
}

impl BranchResult {
    /// Result row of a branch that does not take part in the solve.
    pub fn inactive(vm_from_pu: f64, vm_to_pu: f64) -> Self {
        Self {
            p_from_mw: 0.0,
            q_from_mvar: 0.0,
            p_to_mw: 0.0,
            q_to_mvar: 0.0,
            i_from_ka: 0.0,
            i_to_ka: 0.0,
            vm_from_pu,
            vm_to_pu,
        }
    }
}

/// Result tables of a power flow, indexed like the pandapower tables they belong to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerFlowResults {
    pub bus: Vec<BusResult>,
    pub r#gen: Vec<InjectionResult>,
    pub ext_grid: Vec<InjectionResult>,
    pub load: Vec<InjectionResult>,
    pub shunt: Vec<InjectionResult>,
    pub line: Vec<BranchResult>,
    pub trafo: Vec<BranchResult>,
    /// Solved injections of the internal generator table (ext grids first).
    pub internal_gen: Vec<InjectionResult>,
}

/// What the results are computed from, apart from the internal model.
#[derive(Debug, Clone, Default)]
pub struct ResultInputs {
    /// Voltage base of every pandapower bus.
    pub vn_kv: Vec<f64>,
    /// Scheduled load injections per pandapower load row, `None` when out of service.
    pub load: Vec<Option<(usize, Complex64)>>,
    /// Scheduled sgen injections per internal bus, in MVA.
    pub sgen_per_bus: Vec<Complex64>,
    /// pandapower shunt rows: bus and p.u. admittance, `None` when out of service.
    pub shunt: Vec<Option<(usize, Complex64)>>,
    pub n_gen: usize,
    pub n_ext_grid: usize,
    /// Branch ends as pandapower bus rows, lines then transformers.
    pub line_ends: Vec<(usize, usize)>,
    pub trafo_ends: Vec<(usize, usize)>,
    /// Power (DC) or voltage (AC) based flows.
    pub dc: bool,
}

fn branch_result(
    br: &BranchPorts,
    v: &DVector<Complex64>,
    s_base: f64,
    vn_from: f64,
    vn_to: f64,
    dc: bool,
) -> BranchResult {
    let (vf, vt) = (v[br.from], v[br.to]);
    if dc {
        let p = br.y.b_dc() * (vf.arg() - vt.arg() - br.y.shift) * s_base;
        return BranchResult {
            p_from_mw: p,
            q_from_mvar: 0.0,
            p_to_mw: -p,
            q_to_mvar: 0.0,
            i_from_ka: p.abs() / (3f64.sqrt() * vn_from),
            i_to_ka: p.abs() / (3f64.sqrt() * vn_to),
            vm_from_pu: vf.norm(),
            vm_to_pu: vt.norm(),
        };
    }
    let (i_f, i_t) = br.y.currents(vf, vt);
    let sf = vf * i_f.conj() * s_base;
    let st = vt * i_t.conj() * s_base;
    let i_base_from = s_base / (3f64.sqrt() * vn_from);
    let i_base_to = s_base / (3f64.sqrt() * vn_to);
    BranchResult {
        p_from_mw: sf.re,
        q_from_mvar: sf.im,
        p_to_mw: st.re,
        q_to_mvar: st.im,
        i_from_ka: i_f.norm() * i_base_from,
        i_to_ka: i_t.norm() * i_base_to,
        vm_from_pu: vf.norm(),
        vm_to_pu: vt.norm(),
    }
}

impl PFNetwork {
    /// Builds the result tables from the solved internal voltages.
    ///
    /// Generator reactive power is split evenly between the sources of a bus.
    /// At a reference bus fed by an external grid the generators keep their
    /// scheduled active power and the external grid takes the remainder,
    /// otherwise the slack generators of the bus share it.
    pub fn results(
        &self,
        y_bus: &CscMatrix<Complex64>,
        v: &DVector<Complex64>,
        inputs: &ResultInputs,
    ) -> PowerFlowResults {
        let sb = self.s_base;
        let s_net = if inputs.dc {
            self.dc_injections(v)
        } else {
            Self::s_calc(y_bus, v)
        };

        let mut s_load = vec![Complex64::default(); self.n_bus()];
        let mut load = vec![InjectionResult::ZERO; inputs.load.len()];
        for (row, item) in inputs.load.iter().enumerate() {
            if let Some((bus, s)) = item {
                if let Some(i) = self.bus_lookup[*bus] {
                    s_load[i] += s;
                    load[row] = InjectionResult {
                        p_mw: s.re,
                        q_mvar: s.im,
                    };
                }
            }
        }
        let mut shunt = vec![InjectionResult::ZERO; inputs.shunt.len()];
        for (row, item) in inputs.shunt.iter().enumerate() {
            if let Some((bus, y)) = item {
                if let Some(i) = self.bus_lookup[*bus] {
                    let s = y.conj() * v[i].norm_sqr() * sb;
                    shunt[row] = InjectionResult {
                        p_mw: s.re,
                        q_mvar: s.im,
                    };
                }
            }
        }

        // total source injection per bus
        let s_gen: Vec<Complex64> = (0..self.n_bus())
            .map(|i| s_net[i] * sb + s_load[i] - inputs.sgen_per_bus[i])
            .collect();

        let mut internal_gen = vec![InjectionResult::ZERO; self.internal_gen.len()];
        for i in 0..self.n_bus() {
            let rows: Vec<usize> = (0..self.internal_gen.len())
                .filter(|&g| self.internal_gen[g].bus == i)
                .collect();
            if rows.is_empty() {
                continue;
            }
            let q_share = if inputs.dc {
                0.0
            } else {
                s_gen[i].im / rows.len() as f64
            };
            let has_ext = rows
                .iter()
                .any(|&g| matches!(self.internal_gen[g].source, GenSource::ExtGrid(_)));
            let takes_remainder = |g: usize| match self.internal_gen[g].source {
                GenSource::ExtGrid(_) => true,
                GenSource::Gen(_) => self.kind[i] == BusKind::Ref && !has_ext,
            };
            let fixed: f64 = rows
                .iter()
                .filter(|&&g| !takes_remainder(g))
                .map(|&g| self.internal_gen[g].p_mw)
                .sum();
            let n_slack = rows.iter().filter(|&&g| takes_remainder(g)).count();
            for &g in &rows {
                let p = if takes_remainder(g) {
                    (s_gen[i].re - fixed) / n_slack as f64
                } else {
                    self.internal_gen[g].p_mw
                };
                internal_gen[g] = InjectionResult {
                    p_mw: p,
                    q_mvar: q_share,
                };
            }
        }

        let mut r#gen = vec![InjectionResult::ZERO; inputs.n_gen];
        let mut ext_grid = vec![InjectionResult::ZERO; inputs.n_ext_grid];
        for (row, g) in self.internal_gen.iter().enumerate() {
            match g.source {
                GenSource::Gen(k) => r#gen[k] = internal_gen[row],
                GenSource::ExtGrid(k) => ext_grid[k] = internal_gen[row],
            }
        }

        let mut bus = vec![BusResult::NAN; inputs.vn_kv.len()];
        for (i, &b) in self.internal_to_bus.iter().enumerate() {
            let s = (s_gen[i] - s_load[i] + inputs.sgen_per_bus[i]) * -1.0;
            bus[b] = BusResult {
                vm_pu: v[i].norm(),
                va_degree: v[i].arg().to_degrees(),
                p_mw: s.re,
                q_mvar: s.im,
            };
        }

        let vm_of = |b: usize| bus[b].vm_pu;
        let branch_table = |models: &[Option<BranchPorts>], ends: &[(usize, usize)]| {
            models
                .iter()
                .zip(ends)
                .map(|(m, &(f, t))| match m {
                    Some(br) => branch_result(
                        br,
                        v,
                        sb,
                        inputs.vn_kv[f],
                        inputs.vn_kv[t],
                        inputs.dc,
                    ),
                    None => BranchResult::inactive(vm_of(f), vm_of(t)),
                })
                .collect::<Vec<_>>()
        };
        let line = branch_table(&self.line, &inputs.line_ends);
        let trafo = branch_table(&self.trafo, &inputs.trafo_ends);

        PowerFlowResults {
            bus,
            r#gen,
            ext_grid,
            load,
            shunt,
            line,
            trafo,
            internal_gen,
        }
    }

    /// Active power leaving each bus under the DC approximation, in p.u.
    fn dc_injections(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        let mut p = DVector::from_iterator(
            self.n_bus(),
            self.y_shunt.iter().map(|y| Complex64::new(y.re, 0.0)),
        );
        for br in self.branches() {
            let flow = br.y.b_dc() * (v[br.from].arg() - v[br.to].arg() - br.y.shift);
            p[br.from] += flow;
            p[br.to] -= flow;
        }
        p
    }
}
