use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;

use super::dsbus_dv::ds_bus_dv;
use super::solver::Solve;
use super::system::{mul_ybus, BusKind};
use crate::error::ConvergenceFailure;

/// Maps buses to the unknowns of the polar Newton-Raphson formulation.
///
/// Angles are unknown at PV and PQ buses, magnitudes only at PQ buses.
/// The same numbering is used for the mismatch equations: `P` at PV and PQ
/// buses first, then `Q` at PQ buses.
struct StateIndex {
    ang: Vec<Option<usize>>,
    mag: Vec<Option<usize>>,
    dim: usize,
}

impl StateIndex {
    fn new(kind: &[BusKind]) -> Self {
        let mut ang = vec![None; kind.len()];
        let mut mag = vec![None; kind.len()];
        let mut dim = 0;
        for (i, k) in kind.iter().enumerate() {
            if *k != BusKind::Ref {
                ang[i] = Some(dim);
                dim += 1;
            }
        }
        for (i, k) in kind.iter().enumerate() {
            if *k == BusKind::PQ {
                mag[i] = Some(dim);
                dim += 1;
            }
        }
        Self { ang, mag, dim }
    }

    fn mismatch(&self, mis: &DVector<Complex64>) -> DVector<f64> {
        let mut f = DVector::zeros(self.dim);
        for (i, m) in mis.iter().enumerate() {
            if let Some(k) = self.ang[i] {
                f[k] = m.re;
            }
            if let Some(k) = self.mag[i] {
                f[k] = m.im;
            }
        }
        f
    }

    fn jacobian(&self, y_bus: &CscMatrix<Complex64>, v: &DVector<Complex64>) -> CscMatrix<f64> {
        let mut coo = CooMatrix::new(self.dim, self.dim);
        for e in ds_bus_dv(y_bus, v) {
            for (eq, part) in [(self.ang[e.row], 0), (self.mag[e.row], 1)] {
                let Some(eq) = eq else { continue };
                let pick = |z: Complex64| if part == 0 { z.re } else { z.im };
                if let Some(k) = self.ang[e.col] {
                    coo.push(eq, k, pick(e.d_va));
                }
                if let Some(k) = self.mag[e.col] {
                    coo.push(eq, k, pick(e.d_vm));
                }
            }
        }
        CscMatrix::from(&coo)
    }
}

fn power_mismatch(
    y_bus: &CscMatrix<Complex64>,
    s_bus: &DVector<Complex64>,
    v: &DVector<Complex64>,
) -> DVector<Complex64> {
    let i = mul_ybus(y_bus, v);
    v.zip_map(&i, |v, i| v * i.conj()) - s_bus
}

/// Largest absolute mismatch, NaN as soon as any entry is not finite.
fn inf_norm(f: &DVector<f64>) -> f64 {
    f.iter().try_fold(0.0f64, |m, x| x.is_finite().then(|| m.max(x.abs()))).unwrap_or(f64::NAN)
}

/// Solves the AC power flow equations with the Newton-Raphson method in polar coordinates.
///
/// `v_init` must hold the voltage setpoints at reference and PV buses. The
/// mismatch is checked before the first update, so an initial guess that
/// already satisfies the equations returns after zero iterations.
///
/// Returns the voltages and the number of iterations taken.
pub fn newton_pf<S: Solve>(
    y_bus: &CscMatrix<Complex64>,
    s_bus: &DVector<Complex64>,
    v_init: &DVector<Complex64>,
    kind: &[BusKind],
    tolerance: f64,
    max_iter: usize,
    solver: &mut S,
) -> Result<(DVector<Complex64>, usize), ConvergenceFailure> {
    let idx = StateIndex::new(kind);
    let mut v = v_init.clone();
    let mut v_m = v.map(|x| x.norm());
    let mut v_a = v.map(|x| x.arg());

    let mut f = idx.mismatch(&power_mismatch(y_bus, s_bus, &v));
    let mut norm = inf_norm(&f);
    log::trace!("newton_pf: initial mismatch {norm:e}");
    if !norm.is_finite() {
        return Err(ConvergenceFailure::NonFiniteResult("initial voltages"));
    }
    if norm < tolerance {
        return Ok((v, 0));
    }

    for iteration in 1..=max_iter {
        let jac = idx.jacobian(y_bus, &v);
        let (mut ap, mut ai, mut ax) = jac.disassemble();
        solver
            .solve(&mut ap, &mut ai, &mut ax, f.as_mut_slice(), idx.dim)
            .map_err(ConvergenceFailure::Singular)?;
        let dx = &f;
        for i in 0..v.len() {
            if let Some(k) = idx.ang[i] {
                v_a[i] -= dx[k];
            }
            if let Some(k) = idx.mag[i] {
                v_m[i] -= dx[k];
            }
            v[i] = Complex64::from_polar(v_m[i], v_a[i]);
        }

        f = idx.mismatch(&power_mismatch(y_bus, s_bus, &v));
        norm = inf_norm(&f);
        log::trace!("newton_pf: iteration {iteration}, mismatch {norm:e}");
        if !norm.is_finite() {
            return Err(ConvergenceFailure::NonFiniteResult("bus voltages"));
        }
        if norm < tolerance {
            return Ok((v, iteration));
        }
    }
    Err(ConvergenceFailure::Diverged(max_iter))
}
