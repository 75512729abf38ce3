use derive_more::{Deref, DerefMut, From, Into};
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table};

use super::bus::BusResolver;
use super::display::{FloatWrapper, InjectionResTable, LineResTable};
use super::slack::SlackGen;
use super::topology::GridLayout;
use crate::basic::system::GenSource;
use crate::basic::PowerFlowOutput;
use crate::error::{ConvergenceFailure, Result};
use crate::io::pandapower::Network;

/// Bus selector of every topology slot.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deref, DerefMut, From, Into, Serialize, Deserialize)]
pub struct TopoVect(pub Vec<i32>);

/// Per element quantities published after a power flow, NaN when unknown.
///
/// Powers in MW and MVar, voltages in kV, currents in A.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultVectors {
    pub prod_p: Vec<f64>,
    pub prod_q: Vec<f64>,
    pub prod_v: Vec<f64>,
    pub load_p: Vec<f64>,
    pub load_q: Vec<f64>,
    pub load_v: Vec<f64>,
    pub p_or: Vec<f64>,
    pub q_or: Vec<f64>,
    pub v_or: Vec<f64>,
    pub a_or: Vec<f64>,
    pub p_ex: Vec<f64>,
    pub q_ex: Vec<f64>,
    pub v_ex: Vec<f64>,
    pub a_ex: Vec<f64>,
    pub shunt_p: Vec<f64>,
    pub shunt_q: Vec<f64>,
    pub shunt_v: Vec<f64>,
    /// Bus selector of each shunt, `None` when its bus is not one of its substation.
    pub shunt_bus: Vec<Option<i32>>,
}

impl ResultVectors {
    pub fn new(layout: &GridLayout) -> Self {
        let nan = |n: usize| vec![f64::NAN; n];
        Self {
            prod_p: nan(layout.n_gen),
            prod_q: nan(layout.n_gen),
            prod_v: nan(layout.n_gen),
            load_p: nan(layout.n_load),
            load_q: nan(layout.n_load),
            load_v: nan(layout.n_load),
            p_or: nan(layout.n_line),
            q_or: nan(layout.n_line),
            v_or: nan(layout.n_line),
            a_or: nan(layout.n_line),
            p_ex: nan(layout.n_line),
            q_ex: nan(layout.n_line),
            v_ex: nan(layout.n_line),
            a_ex: nan(layout.n_line),
            shunt_p: nan(layout.n_shunt),
            shunt_q: nan(layout.n_shunt),
            shunt_v: nan(layout.n_shunt),
            shunt_bus: vec![None; layout.n_shunt],
        }
    }

    /// Marks every published quantity as unknown.
    pub fn set_unknown(&mut self) {
        for v in [
            &mut self.prod_p,
            &mut self.prod_q,
            &mut self.prod_v,
            &mut self.load_p,
            &mut self.load_q,
            &mut self.load_v,
            &mut self.p_or,
            &mut self.q_or,
            &mut self.v_or,
            &mut self.a_or,
            &mut self.p_ex,
            &mut self.q_ex,
            &mut self.v_ex,
            &mut self.a_ex,
            &mut self.shunt_p,
            &mut self.shunt_q,
            &mut self.shunt_v,
        ] {
            v.fill(f64::NAN);
        }
        self.shunt_bus.fill(None);
    }

    /// Whether every electrical quantity is unknown.
    pub fn is_unknown(&self) -> bool {
        [
            &self.prod_p,
            &self.prod_q,
            &self.prod_v,
            &self.load_p,
            &self.load_q,
            &self.load_v,
            &self.p_or,
            &self.q_or,
            &self.v_or,
            &self.a_or,
            &self.p_ex,
            &self.q_ex,
            &self.v_ex,
            &self.a_ex,
            &self.shunt_p,
            &self.shunt_q,
            &self.shunt_v,
        ]
        .iter()
        .all(|v| v.iter().all(|x| x.is_nan()))
    }

    /// Reads the solver output into the per element vectors.
    ///
    /// Fails when a generator result is missing or an in-service generator
    /// sits on a bus left out of the solve, or, for AC runs, when a load sits
    /// on a bus without voltage. The vectors are partially written in
    /// that case and must be reset by the caller.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn extract(
        &mut self,
        net: &Network,
        out: &PowerFlowOutput,
        layout: &GridLayout,
        resolver: &BusResolver,
        slack: Option<&SlackGen>,
        line_status: &[bool],
        dc: bool,
    ) -> std::result::Result<(), ConvergenceFailure> {
        let res = &out.results;
        let vm_at = |bus: i64| {
            usize::try_from(bus)
                .ok()
                .and_then(|b| res.bus.get(b))
                .map_or(f64::NAN, |r| r.vm_pu)
        };

        for (i, g) in net.r#gen.iter().enumerate() {
            let r = res.r#gen[i];
            if r.p_mw.is_nan() || r.q_mvar.is_nan() {
                return Err(ConvergenceFailure::NonFiniteResult("generator results"));
            }
            let vm = vm_at(g.bus);
            // left out of the solve with its bus
            if g.in_service && !vm.is_finite() {
                return Err(ConvergenceFailure::IsolatedGen);
            }
            self.prod_p[i] = r.p_mw;
            self.prod_q[i] = r.q_mvar;
            self.prod_v[i] = if g.in_service {
                vm * layout.prod_pu_to_kv[i]
            } else {
                0.0
            };
        }
        if let Some(s) = slack {
            if let Some(ext) = out
                .internal_gen
                .iter()
                .position(|row| row.source == GenSource::ExtGrid(s.ext_grid))
                .map(|row| res.internal_gen[row])
            {
                self.prod_p[s.gen_id] += ext.p_mw;
                self.prod_q[s.gen_id] += ext.q_mvar;
            }
        }

        for (i, l) in net.load.iter().enumerate() {
            self.load_p[i] = res.load[i].p_mw;
            self.load_q[i] = res.load[i].q_mvar;
            self.load_v[i] = vm_at(l.bus) * layout.load_pu_to_kv[i];
        }
        if !dc && self.load_v.iter().any(|v| !v.is_finite()) {
            return Err(ConvergenceFailure::IsolatedLoad);
        }

        for (i, br) in res.line.iter().chain(&res.trafo).enumerate() {
            let finite_or_zero = |x: f64| if x.is_finite() { x } else { 0.0 };
            let (mut v_or, mut v_ex) = (finite_or_zero(br.vm_from_pu), finite_or_zero(br.vm_to_pu));
            if !line_status[i] {
                v_or = 0.0;
                v_ex = 0.0;
            }
            self.p_or[i] = br.p_from_mw;
            self.q_or[i] = br.q_from_mvar;
            self.v_or[i] = v_or * layout.lines_or_pu_to_kv[i];
            self.a_or[i] = finite_or_zero(br.i_from_ka * 1000.0);
            self.p_ex[i] = br.p_to_mw;
            self.q_ex[i] = br.q_to_mvar;
            self.v_ex[i] = v_ex * layout.lines_ex_pu_to_kv[i];
            self.a_ex[i] = finite_or_zero(br.i_to_ka * 1000.0);
        }

        for (i, sh) in net.shunt.iter().enumerate() {
            self.shunt_p[i] = res.shunt[i].p_mw;
            self.shunt_q[i] = res.shunt[i].q_mvar;
            let vn = usize::try_from(sh.bus)
                .ok()
                .and_then(|b| net.bus.get(b))
                .map_or(f64::NAN, |b| b.vn_kv);
            self.shunt_v[i] = if sh.in_service { vm_at(sh.bus) * vn } else { 0.0 };
            self.shunt_bus[i] = resolver.selector(sh.bus, sh.in_service, layout.shunt_to_subid[i]);
        }
        Ok(())
    }

    /// Branch results as a markdown table.
    pub fn line_table(&self, layout: &GridLayout, line_status: &[bool]) -> String {
        let rows = (0..layout.n_line).map(|i| LineResTable {
            name: layout.name_line[i].clone(),
            status: line_status.get(i).copied().unwrap_or(false),
            p_or_mw: FloatWrapper::new(self.p_or[i], 3),
            q_or_mvar: FloatWrapper::new(self.q_or[i], 3),
            v_or_kv: FloatWrapper::new(self.v_or[i], 2),
            a_or: FloatWrapper::new(self.a_or[i], 1),
            p_ex_mw: FloatWrapper::new(self.p_ex[i], 3),
            q_ex_mvar: FloatWrapper::new(self.q_ex[i], 3),
            v_ex_kv: FloatWrapper::new(self.v_ex[i], 2),
            a_ex: FloatWrapper::new(self.a_ex[i], 1),
            rho: FloatWrapper::new(self.a_or[i].max(self.a_ex[i]) / layout.thermal_limit_a[i], 3),
        });
        Table::new(rows).with(Style::markdown()).to_string()
    }

    /// Generator and load results as a markdown table.
    pub fn injection_table(&self, layout: &GridLayout) -> String {
        let gens = (0..layout.n_gen).map(|i| InjectionResTable {
            name: layout.name_gen[i].clone(),
            sub: layout.gen_to_subid[i],
            p_mw: FloatWrapper::new(self.prod_p[i], 3),
            q_mvar: FloatWrapper::new(self.prod_q[i], 3),
            v_kv: FloatWrapper::new(self.prod_v[i], 2),
        });
        let loads = (0..layout.n_load).map(|i| InjectionResTable {
            name: layout.name_load[i].clone(),
            sub: layout.load_to_subid[i],
            p_mw: FloatWrapper::new(self.load_p[i], 3),
            q_mvar: FloatWrapper::new(self.load_q[i], 3),
            v_kv: FloatWrapper::new(self.load_v[i], 2),
        });
        Table::new(gens.chain(loads))
            .with(Style::markdown())
            .to_string()
    }
}

/// In-service flag of every branch, lines then transformers.
pub(crate) fn line_status_from_tables(net: &Network) -> Vec<bool> {
    net.line
        .iter()
        .map(|l| l.in_service)
        .chain(net.trafo.iter().map(|t| t.in_service))
        .collect()
}

/// Decodes the bus selector of every slot from the tables.
pub(crate) fn topo_vect_from_tables(
    net: &Network,
    layout: &GridLayout,
    resolver: &BusResolver,
) -> Result<TopoVect> {
    let mut topo = vec![0; layout.dim_topo];
    let branch_ends = net
        .line
        .iter()
        .map(|l| (l.from_bus, l.to_bus, l.in_service))
        .chain(net.trafo.iter().map(|t| (t.hv_bus, t.lv_bus, t.in_service)));
    for (i, (or, ex, status)) in branch_ends.enumerate() {
        let name = &layout.name_line[i];
        topo[layout.line_or_pos_topo_vect[i]] =
            resolver.decode(name, or, status, layout.line_or_to_subid[i])?;
        topo[layout.line_ex_pos_topo_vect[i]] =
            resolver.decode(name, ex, status, layout.line_ex_to_subid[i])?;
    }
    for (i, g) in net.r#gen.iter().enumerate() {
        topo[layout.gen_pos_topo_vect[i]] =
            resolver.decode(&layout.name_gen[i], g.bus, g.in_service, layout.gen_to_subid[i])?;
    }
    for (i, l) in net.load.iter().enumerate() {
        topo[layout.load_pos_topo_vect[i]] =
            resolver.decode(&layout.name_load[i], l.bus, l.in_service, layout.load_to_subid[i])?;
    }
    Ok(TopoVect(topo))
}
