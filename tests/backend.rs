use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustpower_backend::prelude::pandapower::*;
use rustpower_backend::prelude::*;
use tempfile::TempDir;

fn bus(index: i64, vn_kv: f64) -> Bus {
    Bus {
        index,
        vn_kv,
        in_service: true,
        ..Default::default()
    }
}

fn line(from_bus: i64, to_bus: i64, length_km: f64) -> Line {
    Line {
        from_bus,
        to_bus,
        length_km,
        r_ohm_per_km: 0.1,
        x_ohm_per_km: 0.4,
        c_nf_per_km: 10.0,
        max_i_ka: 0.5,
        df: 1.0,
        parallel: 1,
        in_service: true,
        ..Default::default()
    }
}

fn generator(bus: i64, p_mw: f64, vm_pu: f64) -> Gen {
    Gen {
        bus,
        p_mw,
        vm_pu,
        scaling: 1.0,
        in_service: true,
        min_q_mvar: Some(-50.0),
        max_q_mvar: Some(50.0),
        ..Default::default()
    }
}

fn load(bus: i64, p_mw: f64, q_mvar: f64) -> Load {
    Load {
        bus,
        p_mw,
        q_mvar,
        scaling: 1.0,
        in_service: true,
        ..Default::default()
    }
}

/// Four 110 kV substations in a meshed ring, a 20 kV substation behind a
/// transformer and an external grid without a slack generator.
fn case5() -> Network {
    Network {
        bus: vec![
            bus(0, 110.0),
            bus(1, 110.0),
            bus(2, 110.0),
            bus(3, 110.0),
            bus(4, 20.0),
        ],
        line: vec![
            line(0, 1, 10.0),
            line(1, 2, 15.0),
            line(2, 3, 10.0),
            line(3, 0, 20.0),
            line(0, 2, 15.0),
        ],
        trafo: vec![Transformer {
            hv_bus: 2,
            lv_bus: 4,
            sn_mva: 40.0,
            vn_hv_kv: 110.0,
            vn_lv_kv: 20.0,
            vk_percent: 10.0,
            vkr_percent: 0.5,
            pfe_kw: 20.0,
            i0_percent: 0.1,
            df: 1.0,
            parallel: 1,
            in_service: true,
            ..Default::default()
        }],
        r#gen: vec![generator(1, 20.0, 1.02), generator(3, 10.0, 1.01)],
        load: vec![load(1, 30.0, 10.0), load(2, 25.0, 8.0), load(4, 10.0, 3.0)],
        shunt: vec![Shunt {
            bus: 3,
            q_mvar: -5.0,
            vn_kv: 110.0,
            step: 1,
            max_step: 1,
            in_service: true,
            ..Default::default()
        }],
        ext_grid: vec![ExtGrid {
            bus: 0,
            vm_pu: 1.02,
            slack_weight: 1.0,
            in_service: true,
            ..Default::default()
        }],
        f_hz: 50.0,
        sn_mva: 100.0,
        ..Default::default()
    }
}

fn case5_backend() -> (TempDir, PandaPowerBackend) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("case5.json");
    save_pandapower_json(&case5(), &path).unwrap();
    let backend = PandaPowerBackend::load_grid(&path, PowerFlowConfig::default()).unwrap();
    (dir, backend)
}

fn case3_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("cases/case3_no_slack.json")
}

fn assert_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < tol, "{x} != {y}");
    }
}

#[test]
fn test_load_grid_layout() {
    let (_dir, backend) = case5_backend();
    let layout = backend.layout();
    assert_eq!(layout.n_sub, 5);
    assert_eq!(layout.n_line, 6);
    assert_eq!(layout.n_gen, 3);
    assert_eq!(layout.sub_info, vec![4, 4, 5, 3, 2]);
    assert_eq!(layout.dim_topo, 18);

    let slack = backend.slack().unwrap();
    assert_eq!(slack.gen_id, 2);
    assert_eq!(slack.ext_grid, 0);
    let net = backend.network();
    assert_eq!(net.bus.len(), 10);
    assert!(net.bus[5..].iter().all(|b| !b.in_service));
    assert_eq!(net.r#gen[2].bus, 0);
    assert_eq!(backend.get_nb_active_bus(), 5);
    assert!(backend.get_topo_vect().iter().all(|&b| b == 1));
    assert!(backend.results().is_unknown());
}

#[test]
fn test_missing_grid() {
    assert!(matches!(
        PandaPowerBackend::load_grid("no/such/grid.json", PowerFlowConfig::default()),
        Err(BackendError::GridNotFound(_))
    ));
}

#[test]
fn test_ac_power_flow() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());

    let (prod_p, _, prod_v) = backend.generators_info();
    let (load_p, _, load_v) = backend.loads_info();
    let generation: f64 = prod_p.iter().sum();
    let demand: f64 = load_p.iter().sum();
    assert!((demand - 65.0).abs() < 1e-9);
    // losses are positive and small
    assert!(generation > demand && generation < demand + 5.0);
    assert!((prod_v[0] - 1.02 * 110.0).abs() < 1e-6);
    assert!((prod_v[1] - 1.01 * 110.0).abs() < 1e-6);
    assert!((prod_v[2] - 1.02 * 110.0).abs() < 1e-6);
    assert!(load_v[2] > 18.0 && load_v[2] < 21.0);

    let (p_or, _, v_or, a_or) = backend.lines_or_info();
    let (p_ex, _, _, a_ex) = backend.lines_ex_info();
    for i in 0..6 {
        assert!(p_or[i] + p_ex[i] > -1e-9, "line {i} generates power");
        assert!(a_or[i] > 0.0 && a_ex[i] > 0.0);
        assert!(v_or[i] > 0.0);
    }
    assert_eq!(backend.get_line_flow(), a_or);
    assert!(backend.get_line_status().iter().all(|&s| s));

    let (_, shunt_q, shunt_v, shunt_bus) = backend.shunt_info();
    assert!(shunt_q[0] < 0.0);
    assert!(shunt_v[0] > 100.0);
    assert_eq!(shunt_bus, &[Some(1)]);

    // the reference row is reported on the slack generator only
    let out = backend.last_output().unwrap();
    assert_eq!(out.internal_gen[0].p_mw, 0.0);
    assert!(backend.comp_time() > 0.0);
}

#[test]
fn test_bus_split_round_trip() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());
    let before = backend.results().clone();
    let layout = backend.layout().clone();
    let line_ex = layout.line_ex_pos_topo_vect[2];
    let line_or = layout.line_or_pos_topo_vect[3];
    let gen_slot = layout.gen_pos_topo_vect[1];

    let mut action = backend.do_nothing_action();
    action.set_bus(&layout, line_ex, 2);
    action.set_bus(&layout, gen_slot, 2);
    backend.apply_action(Some(&action)).unwrap();
    assert_eq!(backend.get_nb_active_bus(), 6);
    assert!(backend.run_pf(false).unwrap());

    let topo = backend.get_topo_vect();
    assert_eq!(topo[line_ex], 2);
    assert_eq!(topo[gen_slot], 2);
    assert_eq!(topo[line_or], 1);
    assert_eq!(backend.network().r#gen[1].bus, 8);
    assert_eq!(backend.network().line[2].to_bus, 8);
    assert_eq!(backend.get_active_bus()[3], [true, true]);
    let (_, _, prod_v) = backend.generators_info();
    assert!((prod_v[1] - 1.01 * 110.0).abs() < 1e-6);

    let mut action = backend.do_nothing_action();
    action.active_bus[3] = [true, false];
    action.set_bus(&layout, line_ex, 1);
    action.set_bus(&layout, gen_slot, 1);
    backend.apply_action(Some(&action)).unwrap();
    assert_eq!(backend.get_nb_active_bus(), 5);
    assert!(backend.run_pf(false).unwrap());
    assert!(backend.get_topo_vect().iter().all(|&b| b == 1));
    assert_close(&backend.results().prod_p, &before.prod_p, 1e-4);
    assert_close(&backend.results().a_or, &before.a_or, 1e-3);
}

#[test]
fn test_disconnect_line() {
    let (_dir, mut backend) = case5_backend();
    backend.disconnect_line(4).unwrap();
    let layout = backend.layout().clone();
    assert_eq!(backend.get_topo_vect()[layout.line_or_pos_topo_vect[4]], -1);
    assert_eq!(backend.get_topo_vect()[layout.line_ex_pos_topo_vect[4]], -1);
    assert!(!backend.get_line_status()[4]);

    assert!(backend.run_pf(false).unwrap());
    let (p_or, q_or, v_or, a_or) = backend.lines_or_info();
    assert_eq!((p_or[4], q_or[4], v_or[4], a_or[4]), (0.0, 0.0, 0.0, 0.0));
    assert!(a_or[0] > 0.0);
    assert_eq!(backend.get_topo_vect()[layout.line_or_pos_topo_vect[4]], -1);
    // the bus columns are kept for a later reconnection
    assert_eq!(backend.network().line[4].from_bus, 0);

    backend.reconnect_line(4).unwrap();
    assert!(backend.run_pf(false).unwrap());
    assert!(backend.lines_or_info().3[4] > 0.0);
    assert!(backend.get_topo_vect().iter().all(|&b| b == 1));

    assert!(matches!(
        backend.disconnect_line(6),
        Err(BackendError::InvalidAction(_))
    ));
}

#[test]
fn test_isolated_load_fails_softly() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());
    let layout = backend.layout().clone();
    let mut action = backend.do_nothing_action();
    action.set_bus(&layout, layout.load_pos_topo_vect[0], -1);
    backend.apply_action(Some(&action)).unwrap();

    assert!(!backend.run_pf(false).unwrap());
    assert!(backend.results().is_unknown());
    assert!(backend.last_output().is_none());
    let (prod_p, _, _) = backend.generators_info();
    assert!(prod_p.iter().all(|p| p.is_nan()));
}

#[test]
fn test_invalid_action_is_rejected() {
    let (_dir, mut backend) = case5_backend();
    let before = backend.network().clone();
    let mut action = backend.do_nothing_action();
    action.load_p.set(0, 50.0);
    action.topo.push((0, 3));
    assert!(matches!(
        backend.apply_action(Some(&action)),
        Err(BackendError::InvalidBus(3))
    ));
    assert_eq!(backend.network(), &before);
    backend.apply_action(None).unwrap();
    assert_eq!(backend.network(), &before);
}

#[test]
fn test_do_nothing_is_idempotent() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());
    let first = backend.results().clone();
    let action = backend.do_nothing_action();
    backend.apply_action(Some(&action)).unwrap();
    assert!(backend.run_pf(false).unwrap());
    let second = backend.results();
    assert_close(&second.prod_p, &first.prod_p, 1e-4);
    assert_close(&second.prod_q, &first.prod_q, 1e-4);
    assert_close(&second.load_v, &first.load_v, 1e-6);
    assert_close(&second.p_or, &first.p_or, 1e-4);
}

#[test]
fn test_injection_changes() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());
    let slack_before = backend.generators_info().0[2];

    let mut action = backend.do_nothing_action();
    action.load_p.set(1, 35.0);
    action.prod_v.set(2, 1.03 * 110.0);
    backend.apply_action(Some(&action)).unwrap();
    assert!((backend.network().ext_grid[0].vm_pu - 1.03).abs() < 1e-12);
    assert!(backend.run_pf(false).unwrap());

    let (prod_p, _, prod_v) = backend.generators_info();
    assert!((backend.loads_info().0[1] - 35.0).abs() < 1e-9);
    assert!(prod_p[2] > slack_before + 9.0);
    assert!((prod_v[2] - 1.03 * 110.0).abs() < 1e-6);
}

#[test]
fn test_reset_reproduces_first_solve() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());
    let first = backend.results().clone();

    let mut action = backend.do_nothing_action();
    action.prod_p.set(0, 35.0);
    backend.apply_action(Some(&action)).unwrap();
    backend.disconnect_line(0).unwrap();
    assert!(backend.run_pf(false).unwrap());

    backend.reset().unwrap();
    assert!(backend.results().is_unknown());
    assert_eq!(backend.comp_time(), 0.0);
    assert_eq!(backend.get_nb_active_bus(), 5);
    assert!(backend.get_topo_vect().iter().all(|&b| b == 1));
    assert!(backend.run_pf(false).unwrap());
    assert_close(&backend.results().prod_p, &first.prod_p, 1e-9);
    assert_close(&backend.results().v_or, &first.v_or, 1e-9);
}

#[test]
fn test_copy_is_independent() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());
    let mut other = backend.copy();
    other.disconnect_line(0).unwrap();
    assert!(other.run_pf(false).unwrap());
    assert!(backend.get_line_status()[0]);
    assert!(backend.network().line[0].in_service);
    assert!(backend.generators_info().0[2] != other.generators_info().0[2]);
    other.close();
}

#[test]
fn test_dc_power_flow() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(true).unwrap());
    let (prod_p, prod_q, _) = backend.generators_info();
    let generation: f64 = prod_p.iter().sum();
    assert!((generation - 65.0).abs() < 1.0);
    assert!(prod_q.iter().all(|q| q.is_finite()));
    let (_, _, load_v) = backend.loads_info();
    assert!(load_v.iter().all(|v| *v > 0.0));
    // an AC run after a DC one starts over from the DC angles
    assert!(backend.run_pf(false).unwrap());
}

#[test]
fn test_case3_slack_synthesis() {
    let mut backend = PandaPowerBackend::load_grid(case3_path(), PowerFlowConfig::default()).unwrap();
    let slack = backend.slack().unwrap();
    assert_eq!(slack.gen_id, 1);
    assert_eq!(slack.iref, 0);
    assert_eq!(backend.layout().dim_topo, 7);
    assert_eq!(backend.layout().sub_info, vec![2, 3, 2]);
    assert_eq!(backend.network().ext_grid[0].va_degree, 0.0);

    assert!(backend.run_pf(false).unwrap());
    let (prod_p, _, _) = backend.generators_info();
    assert!((prod_p[0] - 20.0).abs() < 1e-6);
    assert!(prod_p[1] > 20.0 && prod_p[1] < 21.0);
    assert!(!backend.summary().is_empty());
}

#[test]
fn test_save() {
    let (dir, mut backend) = case5_backend();
    let layout = backend.layout().clone();
    let mut action = backend.do_nothing_action();
    action.set_bus(&layout, layout.load_pos_topo_vect[2], 2);
    action.set_bus(&layout, layout.line_ex_pos_topo_vect[5], 2);
    backend.apply_action(Some(&action)).unwrap();

    let path = dir.path().join("saved.json");
    backend.save(&path).unwrap();
    let saved = load_pandapower_json(&path).unwrap();
    assert_eq!(saved.bus.len(), 10);
    assert_eq!(saved.r#gen.len(), 3);
    assert!(saved.r#gen[2].slack);
    assert_eq!(saved.load[2].bus, 9);
    assert_eq!(saved.trafo[0].lv_bus, 9);
    assert!(saved.bus[9].in_service);
    assert!(saved.bus[4].in_service);
}

#[test]
fn test_generator_on_inactive_bus() {
    let (_dir, mut backend) = case5_backend();
    assert!(backend.run_pf(false).unwrap());
    let layout = backend.layout().clone();
    // the split bus of substation 3 is left out of service
    let mut action = backend.do_nothing_action();
    action.topo.push((layout.gen_pos_topo_vect[1], 2));
    backend.apply_action(Some(&action)).unwrap();
    assert!(!backend.network().bus[8].in_service);

    assert!(!backend.run_pf(false).unwrap());
    assert!(backend.results().is_unknown());
    assert!(!backend.run_pf(true).unwrap());
    assert!(backend.results().is_unknown());
}

#[test]
fn test_disconnect_line_through_action() {
    let (_dir, mut backend) = case5_backend();
    let layout = backend.layout().clone();
    let (or, ex) = (layout.line_or_pos_topo_vect[4], layout.line_ex_pos_topo_vect[4]);
    let mut action = backend.do_nothing_action();
    action.set_bus(&layout, ex, -1);
    backend.apply_action(Some(&action)).unwrap();

    assert!(backend.run_pf(false).unwrap());
    assert_eq!(backend.get_topo_vect()[or], -1);
    assert_eq!(backend.get_topo_vect()[ex], -1);
    assert!(!backend.get_line_status()[4]);
    assert_eq!(backend.lines_or_info().3[4], 0.0);
    assert_eq!(backend.lines_ex_info().2[4], 0.0);
    assert_eq!(backend.lines_ex_info().3[4], 0.0);
}

#[test]
fn test_disconnected_shunt_voltage() {
    let (_dir, mut backend) = case5_backend();
    let mut action = backend.do_nothing_action();
    let mut shunt = ShuntChanges::unchanged(1);
    shunt.bus.set(0, -1);
    action.shunt = Some(shunt);
    backend.apply_action(Some(&action)).unwrap();

    assert!(backend.run_pf(false).unwrap());
    let (_, _, shunt_v, shunt_bus) = backend.shunt_info();
    assert_eq!(shunt_v[0], 0.0);
    assert_eq!(shunt_bus, &[Some(-1)]);
}

#[test]
fn test_random_topology_round_trip() {
    let (_dir, mut backend) = case5_backend();
    let layout = backend.layout().clone();
    let slack = backend.slack().unwrap().gen_id;
    let n_sub = layout.n_sub;
    let injections: Vec<usize> = layout
        .gen_pos_topo_vect
        .iter()
        .chain(&layout.load_pos_topo_vect)
        .copied()
        .collect();
    let mut rng = StdRng::seed_from_u64(7);
    let mut checked = 0;

    for _ in 0..2000 {
        if checked == 20 {
            break;
        }
        let selectors: Vec<i32> = (0..layout.dim_topo)
            .map(|_| if rng.gen_bool(0.3) { 2 } else { 1 })
            .collect();
        let cut: Vec<bool> = (0..layout.n_line).map(|_| rng.gen_bool(0.1)).collect();
        let bus_of = |slot: usize| {
            let sub = layout.big_topo_to_backend[slot].sub;
            if selectors[slot] == 2 { sub + n_sub } else { sub }
        };

        // keep only topologies where every used bus is reached from the slack
        let edges: Vec<(usize, usize)> = (0..layout.n_line)
            .filter(|&i| !cut[i])
            .map(|i| {
                (
                    bus_of(layout.line_or_pos_topo_vect[i]),
                    bus_of(layout.line_ex_pos_topo_vect[i]),
                )
            })
            .collect();
        let mut used = vec![false; 2 * n_sub];
        for &(a, b) in &edges {
            used[a] = true;
            used[b] = true;
        }
        for &slot in &injections {
            used[bus_of(slot)] = true;
        }
        let mut reached = vec![false; 2 * n_sub];
        reached[bus_of(layout.gen_pos_topo_vect[slack])] = true;
        let mut grew = true;
        while grew {
            grew = false;
            for &(a, b) in &edges {
                if reached[a] != reached[b] {
                    reached[a] = true;
                    reached[b] = true;
                    grew = true;
                }
            }
        }
        if used.iter().zip(&reached).any(|(u, r)| *u && !*r) {
            continue;
        }

        backend.reset().unwrap();
        let mut action = backend.do_nothing_action();
        action.active_bus = (0..n_sub).map(|s| [used[s], used[s + n_sub]]).collect();
        for i in 0..layout.n_line {
            let (or, ex) = (layout.line_or_pos_topo_vect[i], layout.line_ex_pos_topo_vect[i]);
            if cut[i] {
                action.topo.push((or, -1));
            } else {
                action.topo.push((or, selectors[or]));
                action.topo.push((ex, selectors[ex]));
            }
        }
        for &slot in &injections {
            action.topo.push((slot, selectors[slot]));
        }
        backend.apply_action(Some(&action)).unwrap();
        assert!(backend.run_pf(false).unwrap(), "{selectors:?} {cut:?}");

        let topo = backend.get_topo_vect();
        for i in 0..layout.n_line {
            let (or, ex) = (layout.line_or_pos_topo_vect[i], layout.line_ex_pos_topo_vect[i]);
            if cut[i] {
                assert_eq!((topo[or], topo[ex]), (-1, -1));
                assert!(!backend.get_line_status()[i]);
            } else {
                assert_eq!((topo[or], topo[ex]), (selectors[or], selectors[ex]));
            }
        }
        for &slot in &injections {
            assert_eq!(topo[slot], selectors[slot]);
        }
        checked += 1;
    }
    assert_eq!(checked, 20);
}
