use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use super::solver::Solve;
use super::system::{BusKind, PFNetwork};
use crate::error::ConvergenceFailure;

/// Solves the DC power flow `B θ = P - P_shift - G_sh` for the bus voltage angles.
///
/// Angles at the reference buses are fixed to the angle of their setpoint.
/// Returns the angles in radians for every internal bus.
pub fn dc_pf<S: Solve>(pf: &PFNetwork, solver: &mut S) -> Result<DVector<f64>, ConvergenceFailure> {
    let n = pf.n_bus();
    let mut theta = DVector::from_iterator(n, pf.v_set.iter().map(|v| v.arg()));

    let mut reduced = vec![None; n];
    let mut dim = 0;
    for i in 0..n {
        if pf.kind[i] != BusKind::Ref {
            reduced[i] = Some(dim);
            dim += 1;
        }
    }
    if dim == 0 {
        return Ok(theta);
    }

    let mut rhs = DVector::from_iterator(
        dim,
        (0..n)
            .filter(|&i| reduced[i].is_some())
            .map(|i| pf.s_bus[i].re - pf.y_shunt[i].re),
    );
    let mut coo = CooMatrix::new(dim, dim);
    for r in 0..dim {
        coo.push(r, r, 0.0);
    }
    for br in pf.branches() {
        let b = br.y.b_dc();
        let p_shift = -b * br.y.shift;
        for (bus, other, sign) in [(br.from, br.to, 1.0), (br.to, br.from, -1.0)] {
            let Some(r) = reduced[bus] else { continue };
            rhs[r] -= sign * p_shift;
            coo.push(r, r, b);
            match reduced[other] {
                Some(c) => coo.push(r, c, -b),
                None => rhs[r] += b * theta[other],
            }
        }
    }
    let b_red = CscMatrix::from(&coo);
    let (mut ap, mut ai, mut ax) = b_red.disassemble();
    solver
        .solve(&mut ap, &mut ai, &mut ax, rhs.as_mut_slice(), dim)
        .map_err(ConvergenceFailure::Singular)?;
    if rhs.iter().any(|x| !x.is_finite()) {
        return Err(ConvergenceFailure::NonFiniteResult("dc angles"));
    }
    for i in 0..n {
        if let Some(r) = reduced[i] {
            theta[i] = rhs[r];
        }
    }
    Ok(theta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::solver::DefaultSolver;
    use crate::basic::system::*;
    use num_complex::Complex64;

    #[test]
    fn test_two_bus_angle() {
        let y = BranchAdmittance::pi_section(
            Admittance(1.0 / Complex64::new(0.0, 0.1)),
            Admittance::default(),
            1.0,
            0.0,
        );
        let pf = PFNetwork {
            s_base: 100.0,
            bus_lookup: vec![Some(0), Some(1)],
            internal_to_bus: vec![0, 1],
            kind: vec![BusKind::Ref, BusKind::PQ],
            v_set: vec![Complex64::new(1.0, 0.0); 2],
            s_bus: DVector::from_vec(vec![Complex64::default(), Complex64::new(-0.5, -0.1)]),
            y_shunt: vec![Complex64::default(); 2],
            line: vec![Some(BranchPorts { from: 0, to: 1, y })],
            trafo: vec![],
            internal_gen: vec![],
        };
        let theta = dc_pf(&pf, &mut DefaultSolver::default()).unwrap();
        assert_eq!(theta[0], 0.0);
        // 0.5 p.u. over x = 0.1
        assert!((theta[1] + 0.05).abs() < 1e-12);
    }
}
