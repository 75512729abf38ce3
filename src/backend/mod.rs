//! The pandapower backend: substation bus splitting on top of the pandapower
//! tables, action application, power flow runs and result extraction.

pub mod action;
mod apply;
pub mod bus;
mod display;
pub mod results;
pub mod slack;
pub mod snapshot;
pub mod topology;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_complex::Complex64;

pub use action::*;
pub use bus::*;
pub use results::{ResultVectors, TopoVect};
pub use slack::SlackGen;
pub use snapshot::GridSnapshot;
pub use topology::*;

use crate::basic::system::GenSource;
use crate::basic::{NewtonEngine, PfInit, PowerFlowEngine, PowerFlowOutput, SolveOptions};
use crate::config::PowerFlowConfig;
use crate::error::{BackendError, ConvergenceFailure, Result};
use crate::io::pandapower::{load_network, save_pandapower_json, Bus, Network};
use apply::{apply_to_tables, set_element_bus};
use results::{line_status_from_tables, topo_vect_from_tables};
use slack::synthesize_slack;

/// Voltages of the last successful AC solve, with the bus count they were computed for.
#[derive(Debug, Clone)]
struct WarmStart {
    nb_bus: usize,
    v_bus: Vec<Complex64>,
}

/// A grid loaded from pandapower tables, with two physical buses per substation.
///
/// Each instance exclusively owns its tables; [`PandaPowerBackend::copy`]
/// produces an independent instance for parallel use.
#[derive(Debug, Clone)]
pub struct PandaPowerBackend<E: PowerFlowEngine = NewtonEngine> {
    net: Network,
    layout: Arc<GridLayout>,
    resolver: BusResolver,
    slack: Option<SlackGen>,
    snapshot: Arc<GridSnapshot>,
    engine: E,
    config: PowerFlowConfig,
    results: ResultVectors,
    topo_vect: TopoVect,
    line_status: Vec<bool>,
    warm_start: Option<WarmStart>,
    last_output: Option<PowerFlowOutput>,
    comp_time: Duration,
}

impl PandaPowerBackend<NewtonEngine> {
    /// Loads a grid from a pandapower JSON file, a CSV folder or a zip of CSV files.
    pub fn load_grid(path: impl AsRef<Path>, config: PowerFlowConfig) -> Result<Self> {
        Self::load_grid_with(path, config, NewtonEngine)
    }
}

impl<E: PowerFlowEngine> PandaPowerBackend<E> {
    /// Loads a grid and solves it with `engine`.
    ///
    /// A slack generator is added when none is declared, then the bus table is
    /// doubled: bus `b + n` is the split bus of substation `b` and starts out
    /// of service.
    pub fn load_grid_with(
        path: impl AsRef<Path>,
        config: PowerFlowConfig,
        mut engine: E,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut net = load_network(path)?;
        net.validate()?;
        log::debug!(
            "loaded {}: {} buses, {} lines, {} trafos, {} gens, {} loads, {} shunts",
            path.display(),
            net.bus.len(),
            net.line.len(),
            net.trafo.len(),
            net.r#gen.len(),
            net.load.len(),
            net.shunt.len()
        );

        let opts = SolveOptions {
            init: PfInit::Dc,
            dc: false,
            max_it: config.max_it(),
            tol: config.tol(),
            warm_start: None,
        };
        let slack = synthesize_slack(&mut net, &mut engine, &opts)?;
        engine
            .solve(&net, &opts)
            .map_err(BackendError::InitialPowerFlow)?;
        for ext in net.ext_grid.iter_mut() {
            ext.va_degree = 0.0;
        }

        let layout = GridLayout::build(&net);
        let n_sub = layout.n_sub;
        let split: Vec<Bus> = net
            .bus
            .iter()
            .map(|b| Bus {
                index: b.index + n_sub as i64,
                in_service: false,
                ..b.clone()
            })
            .collect();
        net.bus.extend(split);

        let resolver = BusResolver::new(n_sub);
        let topo_vect = topo_vect_from_tables(&net, &layout, &resolver)?;
        log::debug!("topology vector of size {}", layout.dim_topo);

        Ok(Self {
            results: ResultVectors::new(&layout),
            line_status: line_status_from_tables(&net),
            snapshot: Arc::new(GridSnapshot::new(net.clone())),
            layout: Arc::new(layout),
            net,
            resolver,
            slack,
            engine,
            config,
            topo_vect,
            warm_start: None,
            last_output: None,
            comp_time: Duration::ZERO,
        })
    }

    /// Applies `action` to the tables; `None` does nothing.
    ///
    /// The topology vector is refreshed by the next successful power flow.
    pub fn apply_action(&mut self, action: Option<&BackendAction>) -> Result<()> {
        let Some(action) = action else {
            return Ok(());
        };
        apply_to_tables(
            &mut self.net,
            &self.layout,
            &self.resolver,
            self.slack.as_ref(),
            action,
        )
    }

    /// Runs a power flow, AC unless `is_dc`.
    ///
    /// Returns `Ok(false)` when the power flow does not converge, in which case
    /// every published quantity is NaN. Only an inconsistent topology is an error.
    pub fn run_pf(&mut self, is_dc: bool) -> Result<bool> {
        let nb_bus = self.get_nb_active_bus();
        let init = match &self.warm_start {
            None => PfInit::Dc,
            Some(w) if w.nb_bus == nb_bus => PfInit::Results,
            Some(_) => PfInit::Auto,
        };
        log::debug!("run_pf: dc = {is_dc}, {nb_bus} active buses, init {init:?}");

        if !is_dc {
            if self.net.load.iter().any(|l| !l.in_service) {
                return Ok(self.fail(ConvergenceFailure::IsolatedLoad));
            }
            if self.net.r#gen.iter().any(|g| !g.in_service) {
                return Ok(self.fail(ConvergenceFailure::IsolatedGen));
            }
        }

        let opts = SolveOptions {
            init,
            dc: is_dc,
            max_it: self.config.max_it(),
            tol: self.config.tol(),
            warm_start: match init {
                PfInit::Results => self.warm_start.as_ref().map(|w| w.v_bus.clone()),
                _ => None,
            },
        };
        let start = Instant::now();
        let solved = self.engine.solve(&self.net, &opts);
        self.comp_time += start.elapsed();
        let mut out = match solved {
            Ok(out) => out,
            Err(e) => return Ok(self.fail(e)),
        };

        self.line_status = line_status_from_tables(&self.net);
        if let Err(e) = self.results.extract(
            &self.net,
            &out,
            &self.layout,
            &self.resolver,
            self.slack.as_ref(),
            &self.line_status,
            is_dc,
        ) {
            return Ok(self.fail(e));
        }

        // the reference row is reported on the slack generator
        if let Some(s) = self.slack {
            if let Some(row) = out
                .internal_gen
                .iter_mut()
                .find(|row| row.source == GenSource::ExtGrid(s.ext_grid))
            {
                row.p_mw = 0.0;
            }
        }
        self.topo_vect = topo_vect_from_tables(&self.net, &self.layout, &self.resolver)?;
        self.warm_start = (!is_dc).then(|| WarmStart {
            nb_bus,
            v_bus: out.v_bus.clone(),
        });
        self.last_output = Some(out);
        Ok(true)
    }

    fn fail(&mut self, reason: ConvergenceFailure) -> bool {
        log::warn!("power flow did not converge: {reason}");
        self.results.set_unknown();
        self.warm_start = None;
        self.last_output = None;
        false
    }

    /// Restores the tables captured after loading.
    pub fn reset(&mut self) -> Result<()> {
        self.net = self.snapshot.restore();
        self.results.set_unknown();
        self.line_status = line_status_from_tables(&self.net);
        self.topo_vect = topo_vect_from_tables(&self.net, &self.layout, &self.resolver)?;
        self.comp_time = Duration::ZERO;
        self.warm_start = None;
        self.last_output = None;
        Ok(())
    }

    /// An independent copy of this backend, sharing only the immutable load-time data.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Releases the grid.
    pub fn close(self) {
        log::debug!("closing backend of {} substations", self.layout.n_sub);
    }

    /// Writes the current tables as pandapower JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_pandapower_json(&self.net, path)
    }

    /// Number of physical buses in service.
    pub fn get_nb_active_bus(&self) -> usize {
        self.net.bus.iter().filter(|b| b.in_service).count()
    }

    /// In-service flags of the (original, split) buses of every substation.
    pub fn get_active_bus(&self) -> Vec<[bool; 2]> {
        let n = self.layout.n_sub;
        (0..n)
            .map(|s| [self.net.bus[s].in_service, self.net.bus[s + n].in_service])
            .collect()
    }

    /// An action that leaves the grid as it is.
    pub fn do_nothing_action(&self) -> BackendAction {
        BackendAction::do_nothing(&self.layout, self.get_active_bus())
    }

    fn branch_row(&self, id: usize) -> Result<(TopoKind, usize)> {
        if id >= self.layout.n_line {
            return Err(BackendError::InvalidAction(format!(
                "powerline {id} does not exist ({} lines)",
                self.layout.n_line
            )));
        }
        Ok(match id.checked_sub(self.layout.n_line_pp) {
            None => (TopoKind::LineOr, id),
            Some(row) => (TopoKind::TrafoHv, row),
        })
    }

    /// Takes powerline `id` (lines then transformers) out of service.
    pub fn disconnect_line(&mut self, id: usize) -> Result<()> {
        let (kind, row) = self.branch_row(id)?;
        set_element_bus(&mut self.net, kind, row, -1, None);
        self.topo_vect[self.layout.line_or_pos_topo_vect[id]] = DISCONNECTED;
        self.topo_vect[self.layout.line_ex_pos_topo_vect[id]] = DISCONNECTED;
        self.line_status[id] = false;
        Ok(())
    }

    /// Puts powerline `id` back in service on the buses it was last connected to.
    pub fn reconnect_line(&mut self, id: usize) -> Result<()> {
        match self.branch_row(id)? {
            (TopoKind::LineOr, row) => self.net.line[row].in_service = true,
            (_, row) => self.net.trafo[row].in_service = true,
        }
        self.line_status[id] = true;
        Ok(())
    }

    /// Active power, reactive power and voltage of the generators.
    pub fn generators_info(&self) -> (&[f64], &[f64], &[f64]) {
        let r = &self.results;
        (&r.prod_p, &r.prod_q, &r.prod_v)
    }

    /// Active power, reactive power and voltage of the loads.
    pub fn loads_info(&self) -> (&[f64], &[f64], &[f64]) {
        let r = &self.results;
        (&r.load_p, &r.load_q, &r.load_v)
    }

    /// Active power, reactive power, voltage and current at the origin of every powerline.
    pub fn lines_or_info(&self) -> (&[f64], &[f64], &[f64], &[f64]) {
        let r = &self.results;
        (&r.p_or, &r.q_or, &r.v_or, &r.a_or)
    }

    /// Active power, reactive power, voltage and current at the extremity of every powerline.
    pub fn lines_ex_info(&self) -> (&[f64], &[f64], &[f64], &[f64]) {
        let r = &self.results;
        (&r.p_ex, &r.q_ex, &r.v_ex, &r.a_ex)
    }

    /// Active power, reactive power, voltage and bus selector of the shunts.
    pub fn shunt_info(&self) -> (&[f64], &[f64], &[f64], &[Option<i32>]) {
        let r = &self.results;
        (&r.shunt_p, &r.shunt_q, &r.shunt_v, &r.shunt_bus)
    }

    pub fn get_line_status(&self) -> &[bool] {
        &self.line_status
    }

    /// Current at the origin of every powerline, in A.
    pub fn get_line_flow(&self) -> &[f64] {
        &self.results.a_or
    }

    pub fn get_topo_vect(&self) -> &TopoVect {
        &self.topo_vect
    }

    pub fn thermal_limit_a(&self) -> &[f64] {
        &self.layout.thermal_limit_a
    }

    /// Total time spent in the solver since loading or the last reset, in seconds.
    pub fn comp_time(&self) -> f64 {
        self.comp_time.as_secs_f64()
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn network(&self) -> &Network {
        &self.net
    }

    pub fn slack(&self) -> Option<SlackGen> {
        self.slack
    }

    pub fn results(&self) -> &ResultVectors {
        &self.results
    }

    /// Raw solver output of the last successful power flow.
    ///
    /// Its internal generator table is the recorded contribution of each
    /// reference row. The row of the external grid behind the slack generator
    /// is recorded as 0 MW, its power being reported on the slack generator;
    /// the solved value stays in `results.internal_gen`.
    pub fn last_output(&self) -> Option<&PowerFlowOutput> {
        self.last_output.as_ref()
    }

    /// Markdown tables of the current results, for debugging.
    pub fn summary(&self) -> String {
        format!(
            "{}\n\n{}",
            self.results.injection_table(&self.layout),
            self.results.line_table(&self.layout, &self.line_status)
        )
    }
}
