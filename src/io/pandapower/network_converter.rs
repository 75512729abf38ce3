use std::f64::consts::PI;

use nalgebra::DVector;
use num_complex::Complex64;
use num_traits::Zero;

use crate::basic::system::*;
use crate::error::ConvergenceFailure;
use super::file_io::*;

/// Converts a line to its π model in per unit of the system base.
fn line_to_admit(wbase: f64, s_base: f64, bus: &[Bus], line: &Line) -> BranchAdmittance {
    let parallel = line.parallel.max(1) as f64;
    let v_base = bus[line.from_bus as usize].vn_kv;
    let z_base = v_base * v_base / s_base;

    let z = Complex64::new(line.r_ohm_per_km, line.x_ohm_per_km) * line.length_km / parallel;
    let b = wbase * 1e-9 * line.c_nf_per_km * line.length_km * parallel;
    let g = line.g_us_per_km * line.length_km * 1e-6 * parallel;

    BranchAdmittance::pi_section(
        Admittance(z_base / z),
        Admittance(Complex64::new(g, b) * z_base),
        1.0,
        0.0,
    )
}

/// Converts a two winding transformer to its π model in per unit of the system base.
fn trafo_to_admit(s_base: f64, bus: &[Bus], item: &Transformer) -> BranchAdmittance {
    let parallel = item.parallel.max(1) as f64;
    let vn_hv_bus = bus[item.hv_bus as usize].vn_kv;
    let vn_lv_bus = bus[item.lv_bus as usize].vn_kv;

    // short circuit impedance on the rated power, moved to the system base and the lv bus voltage
    let vk = item.vk_percent * 0.01;
    let vkr = item.vkr_percent * 0.01;
    let xk = (vk * vk - vkr * vkr).max(0.0).sqrt();
    let ratio_lv = item.vn_lv_kv / vn_lv_bus;
    let z = Complex64::new(vkr, xk) * (s_base / item.sn_mva) * ratio_lv * ratio_lv / parallel;

    // magnetizing branch
    let g_m = 0.001 * item.pfe_kw / item.sn_mva;
    let y_m = 0.01 * item.i0_percent;
    let b_m = (y_m * y_m - g_m * g_m).max(0.0).sqrt();
    let y_mag = Complex64::new(g_m, -b_m) * (item.sn_mva / s_base) * parallel;

    let mut tap = (item.vn_hv_kv / vn_hv_bus) / ratio_lv;
    let mut shift = item.shift_degree;
    if let Some(pos) = item.tap_pos {
        let steps = pos - item.tap_neutral.unwrap_or(0.0);
        let delta = 1.0 + steps * 0.01 * item.tap_step_percent.unwrap_or(0.0);
        match item.tap_side.as_deref() {
            Some("lv") => tap /= delta,
            _ => tap *= delta,
        }
        if item.tap_phase_shifter {
            shift += steps * item.tap_step_degree.unwrap_or(0.0);
        }
    }

    BranchAdmittance::pi_section(Admittance(1.0 / z), Admittance(y_mag), tap, shift.to_radians())
}

/// Converts a shunt to its admittance in per unit of its bus voltage.
fn shunt_to_admit(s_base: f64, bus: &[Bus], item: &Shunt) -> Complex64 {
    let vn_bus = bus[item.bus as usize].vn_kv;
    let s = Complex64::new(item.p_mw, -item.q_mvar) * item.step as f64;
    s / s_base * (vn_bus / item.vn_kv).powi(2)
}

/// Looks up the internal row of an element bus, if the bus takes part in the solve.
fn active_bus(lookup: &[Option<usize>], bus: i64) -> Option<usize> {
    usize::try_from(bus)
        .ok()
        .and_then(|b| lookup.get(b).copied().flatten())
}

impl TryFrom<&Network> for PFNetwork {
    type Error = ConvergenceFailure;

    fn try_from(value: &Network) -> Result<Self, Self::Error> {
        let s_base = value.sn_mva;
        let wbase = value.f_hz * 2.0 * PI;
        let bus = &value.bus;

        let mut bus_lookup = vec![None; bus.len()];
        let mut internal_to_bus = Vec::new();
        for (idx, b) in bus.iter().enumerate() {
            if b.in_service {
                bus_lookup[idx] = Some(internal_to_bus.len());
                internal_to_bus.push(idx);
            }
        }
        let n = internal_to_bus.len();

        let line = value
            .line
            .iter()
            .map(|l| {
                let from = active_bus(&bus_lookup, l.from_bus)?;
                let to = active_bus(&bus_lookup, l.to_bus)?;
                l.in_service.then(|| BranchPorts {
                    from,
                    to,
                    y: line_to_admit(wbase, s_base, bus, l),
                })
            })
            .collect();
        let trafo = value
            .trafo
            .iter()
            .map(|t| {
                let from = active_bus(&bus_lookup, t.hv_bus)?;
                let to = active_bus(&bus_lookup, t.lv_bus)?;
                t.in_service.then(|| BranchPorts {
                    from,
                    to,
                    y: trafo_to_admit(s_base, bus, t),
                })
            })
            .collect();

        let mut y_shunt = vec![Complex64::zero(); n];
        for sh in value.shunt.iter().filter(|x| x.in_service) {
            if let Some(i) = active_bus(&bus_lookup, sh.bus) {
                y_shunt[i] += shunt_to_admit(s_base, bus, sh);
            }
        }

        let mut kind = vec![BusKind::PQ; n];
        let mut v_set = vec![Complex64::new(1.0, 0.0); n];
        let mut internal_gen = Vec::new();
        for (idx, ext) in value.ext_grid.iter().enumerate() {
            let Some(i) = active_bus(&bus_lookup, ext.bus).filter(|_| ext.in_service) else {
                continue;
            };
            kind[i] = BusKind::Ref;
            v_set[i] = Complex64::from_polar(ext.vm_pu, ext.va_degree.to_radians());
            internal_gen.push(InternalGen {
                bus: i,
                source: GenSource::ExtGrid(idx),
                p_mw: 0.0,
                q_mvar: 0.0,
                vm_pu: ext.vm_pu,
                max_p_mw: ext.max_p_mw,
                min_p_mw: ext.min_p_mw,
                max_q_mvar: ext.max_q_mvar,
                min_q_mvar: ext.min_q_mvar,
            });
        }
        let mut s_bus = DVector::from_element(n, Complex64::zero());
        for (idx, g) in value.r#gen.iter().enumerate() {
            let Some(i) = active_bus(&bus_lookup, g.bus).filter(|_| g.in_service) else {
                continue;
            };
            match kind[i] {
                BusKind::PQ if g.slack => {
                    kind[i] = BusKind::Ref;
                    v_set[i] = Complex64::new(g.vm_pu, 0.0);
                }
                BusKind::PQ => {
                    kind[i] = BusKind::PV;
                    v_set[i] = Complex64::new(g.vm_pu, 0.0);
                }
                BusKind::PV if g.slack => kind[i] = BusKind::Ref,
                _ => {}
            }
            s_bus[i] += Complex64::new(g.p_mw * g.scaling, 0.0);
            internal_gen.push(InternalGen {
                bus: i,
                source: GenSource::Gen(idx),
                p_mw: g.p_mw * g.scaling,
                q_mvar: 0.0,
                vm_pu: g.vm_pu,
                max_p_mw: g.max_p_mw,
                min_p_mw: g.min_p_mw,
                max_q_mvar: g.max_q_mvar,
                min_q_mvar: g.min_q_mvar,
            });
        }
        if !kind.contains(&BusKind::Ref) {
            return Err(ConvergenceFailure::NoReferenceBus);
        }

        for load in value.load.iter().filter(|x| x.in_service) {
            if let Some(i) = active_bus(&bus_lookup, load.bus) {
                s_bus[i] -= Complex64::new(load.p_mw, load.q_mvar) * load.scaling;
            }
        }
        for sgen in value.sgen.iter().filter(|x| x.in_service) {
            if let Some(i) = active_bus(&bus_lookup, sgen.bus) {
                s_bus[i] += Complex64::new(sgen.p_mw, sgen.q_mvar) * sgen.scaling;
            }
        }
        s_bus.apply(|x| *x /= s_base);

        Ok(Self {
            s_base,
            bus_lookup,
            internal_to_bus,
            kind,
            v_set,
            s_bus,
            y_shunt,
            line,
            trafo,
            internal_gen,
        })
    }
}

/// Collects what result extraction needs from the tables the model was built from.
pub fn result_inputs(net: &Network, pf: &PFNetwork, dc: bool) -> ResultInputs {
    let s_base = net.sn_mva;
    let as_row = |b: i64| usize::try_from(b).ok();
    let load = net
        .load
        .iter()
        .map(|l| {
            let bus = as_row(l.bus).filter(|_| l.in_service)?;
            Some((bus, Complex64::new(l.p_mw, l.q_mvar) * l.scaling))
        })
        .collect();
    let shunt = net
        .shunt
        .iter()
        .map(|sh| {
            let bus = as_row(sh.bus).filter(|_| sh.in_service)?;
            Some((bus, shunt_to_admit(s_base, &net.bus, sh)))
        })
        .collect();
    let mut sgen_per_bus = vec![Complex64::zero(); pf.n_bus()];
    for sgen in net.sgen.iter().filter(|x| x.in_service) {
        if let Some(i) = active_bus(&pf.bus_lookup, sgen.bus) {
            sgen_per_bus[i] += Complex64::new(sgen.p_mw, sgen.q_mvar) * sgen.scaling;
        }
    }
    let ends = |f: i64, t: i64| (f.max(0) as usize, t.max(0) as usize);
    ResultInputs {
        vn_kv: net.bus.iter().map(|b| b.vn_kv).collect(),
        load,
        sgen_per_bus,
        shunt,
        n_gen: net.r#gen.len(),
        n_ext_grid: net.ext_grid.len(),
        line_ends: net.line.iter().map(|l| ends(l.from_bus, l.to_bus)).collect(),
        trafo_ends: net.trafo.iter().map(|t| ends(t.hv_bus, t.lv_bus)).collect(),
        dc,
    }
}
