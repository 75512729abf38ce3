use serde::{Deserialize, Serialize};

use crate::basic::system::GenSource;
use crate::basic::{PowerFlowEngine, SolveOptions};
use crate::error::{BackendError, Result};
use crate::io::pandapower::{Gen, Network};

/// A generator added at load time to stand for the external grid.
///
/// The external grid stays in the tables; both share the reference bus and
/// their powers are reported together on `gen_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackGen {
    /// Row of the added generator in the gen table.
    pub gen_id: usize,
    /// Row of the external grid it mirrors.
    pub ext_grid: usize,
    /// Row of that external grid in the internal generator table of the load-time solve.
    pub iref: usize,
}

/// Adds a slack generator when no generator is flagged as slack.
///
/// Runs one power flow and looks for the internal generator rows sitting on a
/// bus without any generator. Exactly one such row must exist; the new
/// generator copies its solved active power, voltage setpoint and limits.
pub fn synthesize_slack<E: PowerFlowEngine>(
    net: &mut Network,
    engine: &mut E,
    opts: &SolveOptions,
) -> Result<Option<SlackGen>> {
    if net.r#gen.iter().any(|g| g.slack) {
        return Ok(None);
    }
    let out = engine
        .solve(net, opts)
        .map_err(BackendError::InitialPowerFlow)?;

    let gen_buses: Vec<usize> = out
        .internal_gen
        .iter()
        .filter(|row| matches!(row.source, GenSource::Gen(_)))
        .map(|row| row.bus)
        .collect();
    let candidates: Vec<(usize, usize)> = out
        .internal_gen
        .iter()
        .enumerate()
        .filter(|(_, row)| !gen_buses.contains(&row.bus))
        .filter_map(|(iref, row)| match row.source {
            GenSource::ExtGrid(k) => Some((iref, k)),
            GenSource::Gen(_) => None,
        })
        .collect();

    let (iref, ext_grid) = match candidates.as_slice() {
        [] => return Err(BackendError::NoReferenceBus),
        [one] => *one,
        many => {
            let buses = many
                .iter()
                .map(|&(iref, _)| out.internal_to_bus[out.internal_gen[iref].bus])
                .collect();
            return Err(BackendError::AmbiguousReferenceBus(buses));
        }
    };
    let row = &out.internal_gen[iref];
    let bus = out.internal_to_bus[row.bus];
    let gen_id = net.r#gen.len();
    net.r#gen.push(Gen {
        bus: bus as i64,
        p_mw: row.p_mw,
        vm_pu: row.vm_pu,
        min_p_mw: row.min_p_mw,
        max_p_mw: row.max_p_mw,
        min_q_mvar: row.min_q_mvar,
        max_q_mvar: row.max_q_mvar,
        slack: true,
        controllable: Some(true),
        in_service: true,
        scaling: 1.0,
        slack_weight: 1.0,
        ..Default::default()
    });
    log::debug!(
        "added slack generator {gen_id} at bus {bus} (p = {:.3} MW, vm = {:.4} pu)",
        row.p_mw,
        row.vm_pu
    );
    Ok(Some(SlackGen {
        gen_id,
        ext_grid,
        iref,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::NewtonEngine;
    use crate::io::pandapower::*;
    use std::path::PathBuf;

    fn case3() -> Network {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("cases/case3_no_slack.json");
        load_pandapower_json(path).unwrap()
    }

    #[test]
    fn test_slack_added_at_external_grid() {
        let mut net = case3();
        let slack = synthesize_slack(&mut net, &mut NewtonEngine, &SolveOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(
            slack,
            SlackGen {
                gen_id: 1,
                ext_grid: 0,
                iref: 0
            }
        );
        assert_eq!(net.r#gen.len(), 2);
        let added = &net.r#gen[1];
        assert_eq!(added.bus, 0);
        assert!(added.slack);
        assert_eq!(added.vm_pu, 1.02);
        // the external grid supplied the load minus the generator and the losses
        assert!(added.p_mw > 20.0 && added.p_mw < 21.0);
    }

    #[test]
    fn test_existing_slack_is_kept() {
        let mut net = case3();
        net.r#gen[0].slack = true;
        let before = net.clone();
        assert_eq!(
            synthesize_slack(&mut net, &mut NewtonEngine, &SolveOptions::default()).unwrap(),
            None
        );
        assert_eq!(net, before);
    }

    #[test]
    fn test_ambiguous_reference() {
        let mut net = case3();
        let mut second = net.ext_grid[0].clone();
        second.bus = 1;
        net.ext_grid.push(second);
        assert!(matches!(
            synthesize_slack(&mut net, &mut NewtonEngine, &SolveOptions::default()),
            Err(BackendError::AmbiguousReferenceBus(buses)) if buses == vec![0, 1]
        ));
    }

    #[test]
    fn test_external_grid_on_generator_bus() {
        let mut net = case3();
        net.ext_grid[0].bus = 2;
        assert!(matches!(
            synthesize_slack(&mut net, &mut NewtonEngine, &SolveOptions::default()),
            Err(BackendError::NoReferenceBus)
        ));
    }
}
