use super::action::BackendAction;
use super::bus::BusResolver;
use super::slack::SlackGen;
use super::topology::{GridLayout, TopoKind};
use crate::error::Result;
use crate::io::pandapower::Network;

/// Writes `action` into the pandapower tables.
///
/// The whole action is validated first, so an invalid selector or a
/// dimension mismatch leaves the tables untouched.
pub(crate) fn apply_to_tables(
    net: &mut Network,
    layout: &GridLayout,
    resolver: &BusResolver,
    slack: Option<&SlackGen>,
    action: &BackendAction,
) -> Result<()> {
    action.validate(layout)?;

    for (i, p) in action.prod_p.iter_changed() {
        net.r#gen[i].p_mw = p;
    }
    for (i, v) in action.prod_v.iter_changed() {
        let vm = v / layout.prod_pu_to_kv[i];
        net.r#gen[i].vm_pu = vm;
        if let Some(s) = slack.filter(|s| s.gen_id == i) {
            net.ext_grid[s.ext_grid].vm_pu = vm;
        }
    }
    for (i, p) in action.load_p.iter_changed() {
        net.load[i].p_mw = p;
    }
    for (i, q) in action.load_q.iter_changed() {
        net.load[i].q_mvar = q;
    }

    if let Some(shunt) = &action.shunt {
        for (i, p) in shunt.p.iter_changed() {
            net.shunt[i].p_mw = p;
        }
        for (i, q) in shunt.q.iter_changed() {
            net.shunt[i].q_mvar = q;
        }
        for (i, selector) in shunt.bus.iter_changed() {
            let bus = resolver.resolve(selector, layout.shunt_to_subid[i])?;
            net.shunt[i].in_service = bus >= 0;
            if bus >= 0 {
                net.shunt[i].bus = bus;
            }
        }
    }

    for &(slot, selector) in &action.topo {
        let target = layout.big_topo_to_backend[slot];
        let bus = resolver.resolve(selector, target.sub)?;
        set_element_bus(net, target.kind, target.row, bus, slack);
    }

    let n_sub = layout.n_sub;
    for (s, [original, split]) in action.active_bus.iter().enumerate() {
        net.bus[s].in_service = *original;
        net.bus[s + n_sub].in_service = *split;
    }
    Ok(())
}

/// Moves one element end to `bus`, a negative bus disconnects it.
///
/// Disconnecting a branch end takes the whole branch out of service and keeps
/// its bus columns.
pub(crate) fn set_element_bus(
    net: &mut Network,
    kind: TopoKind,
    row: usize,
    bus: i64,
    slack: Option<&SlackGen>,
) {
    let connect = bus >= 0;
    match kind {
        TopoKind::Load => {
            let load = &mut net.load[row];
            load.in_service = connect;
            load.bus = if connect { bus } else { -1 };
        }
        TopoKind::Gen => {
            let g = &mut net.r#gen[row];
            g.in_service = connect;
            g.bus = if connect { bus } else { -1 };
            if let Some(s) = slack.filter(|s| s.gen_id == row && connect) {
                net.ext_grid[s.ext_grid].bus = bus;
            }
        }
        TopoKind::LineOr | TopoKind::LineEx => {
            let line = &mut net.line[row];
            line.in_service = connect;
            match (kind, connect) {
                (TopoKind::LineOr, true) => line.from_bus = bus,
                (TopoKind::LineEx, true) => line.to_bus = bus,
                _ => {}
            }
        }
        TopoKind::TrafoHv | TopoKind::TrafoLv => {
            let trafo = &mut net.trafo[row];
            trafo.in_service = connect;
            match (kind, connect) {
                (TopoKind::TrafoHv, true) => trafo.hv_bus = bus,
                (TopoKind::TrafoLv, true) => trafo.lv_bus = bus,
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::action::ShuntChanges;
    use crate::error::BackendError;
    use crate::io::pandapower::*;

    /// Three substations in a line with a load, a generator and a shunt; the
    /// generator on bus 0 mirrors the external grid.
    fn split_grid() -> (Network, GridLayout) {
        let bus = |index| Bus {
            index,
            vn_kv: 20.0,
            in_service: true,
            ..Default::default()
        };
        let line = |from_bus, to_bus| Line {
            from_bus,
            to_bus,
            in_service: true,
            ..Default::default()
        };
        let mut net = Network {
            bus: vec![bus(0), bus(1), bus(2)],
            line: vec![line(0, 1), line(1, 2)],
            r#gen: vec![Gen {
                bus: 0,
                vm_pu: 1.0,
                in_service: true,
                slack: true,
                ..Default::default()
            }],
            load: vec![Load {
                bus: 2,
                p_mw: 5.0,
                in_service: true,
                ..Default::default()
            }],
            shunt: vec![Shunt {
                bus: 1,
                vn_kv: 20.0,
                in_service: true,
                ..Default::default()
            }],
            ext_grid: vec![ExtGrid {
                bus: 0,
                vm_pu: 1.0,
                in_service: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let layout = GridLayout::build(&net);
        for i in 0..3 {
            net.bus.push(Bus {
                index: i + 3,
                in_service: false,
                ..bus(i + 3)
            });
        }
        (net, layout)
    }

    const SLACK: SlackGen = SlackGen {
        gen_id: 0,
        ext_grid: 0,
        iref: 0,
    };

    #[test]
    fn test_injections_and_slack_voltage() {
        let (mut net, layout) = split_grid();
        let resolver = BusResolver::new(3);
        let mut action = BackendAction::do_nothing(&layout, vec![[true, false]; 3]);
        action.prod_v.set(0, 21.0);
        action.load_q.set(0, 1.5);
        apply_to_tables(&mut net, &layout, &resolver, Some(&SLACK), &action).unwrap();
        assert!((net.r#gen[0].vm_pu - 1.05).abs() < 1e-12);
        assert!((net.ext_grid[0].vm_pu - 1.05).abs() < 1e-12);
        assert_eq!(net.load[0].q_mvar, 1.5);
        // unflagged rows are left alone
        assert_eq!(net.load[0].p_mw, 5.0);
    }

    #[test]
    fn test_bus_changes() {
        let (mut net, layout) = split_grid();
        let resolver = BusResolver::new(3);
        let mut action = BackendAction::do_nothing(&layout, vec![[true, false]; 3]);
        let load_slot = layout.load_pos_topo_vect[0];
        let gen_slot = layout.gen_pos_topo_vect[0];
        let line_ex_slot = layout.line_ex_pos_topo_vect[1];
        action.set_bus(&layout, load_slot, 2);
        action.set_bus(&layout, gen_slot, 2);
        action.set_bus(&layout, line_ex_slot, -1);
        action.shunt = Some(ShuntChanges::unchanged(1));
        if let Some(shunt) = action.shunt.as_mut() {
            shunt.bus.set(0, 2);
        }
        apply_to_tables(&mut net, &layout, &resolver, Some(&SLACK), &action).unwrap();

        assert_eq!(net.load[0].bus, 5);
        assert_eq!(net.r#gen[0].bus, 3);
        assert_eq!(net.ext_grid[0].bus, 3);
        assert!(!net.line[1].in_service);
        assert_eq!(net.line[1].to_bus, 2);
        assert_eq!(net.shunt[0].bus, 4);
        assert!(net.bus[5].in_service && net.bus[3].in_service);
        assert!(!net.bus[4].in_service);

        let mut action = BackendAction::do_nothing(&layout, vec![[true, true]; 3]);
        action.set_bus(&layout, load_slot, -1);
        apply_to_tables(&mut net, &layout, &resolver, Some(&SLACK), &action).unwrap();
        assert_eq!(net.load[0].bus, -1);
        assert!(!net.load[0].in_service);
    }

    #[test]
    fn test_invalid_selector_changes_nothing() {
        let (mut net, layout) = split_grid();
        let before = net.clone();
        let resolver = BusResolver::new(3);
        let mut action = BackendAction::do_nothing(&layout, vec![[true, true]; 3]);
        action.load_p.set(0, 9.0);
        action.topo = vec![(layout.load_pos_topo_vect[0], 2), (0, 3)];
        assert!(matches!(
            apply_to_tables(&mut net, &layout, &resolver, None, &action),
            Err(BackendError::InvalidBus(3))
        ));
        assert_eq!(net, before);
    }
}
