use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::system::mul_ybus;

/// One structural entry of the bus power derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DsEntry {
    pub row: usize,
    pub col: usize,
    /// dS_row / dVa_col
    pub d_va: Complex64,
    /// dS_row / dVm_col
    pub d_vm: Complex64,
}

/// Computes the partial derivatives of the bus power injections with respect to
/// voltage angles and magnitudes, entry by entry on the pattern of `y_bus`.
///
/// ```text
/// dS/dVa = j diag(V) conj(diag(I) - Ybus diag(V))
/// dS/dVm = diag(V) conj(Ybus diag(V/|V|)) + conj(diag(I)) diag(V/|V|)
/// ```
///
/// R. D. Zimmerman, "AC Power Flows, Generalized OPF Costs and their
/// Derivatives using Complex Matrix Notation", MATPOWER Technical Note 2, 2010.
///
/// `y_bus` must hold every diagonal entry in its pattern.
pub fn ds_bus_dv(y_bus: &CscMatrix<Complex64>, v: &DVector<Complex64>) -> Vec<DsEntry> {
    let i_bus = mul_ybus(y_bus, v);
    let v_norm = v.map(|x| x / x.norm());
    y_bus
        .triplet_iter()
        .map(|(row, col, y)| {
            let mut d_va = -(y * v[col]).conj();
            let mut d_vm = v[row] * (y * v_norm[col]).conj();
            if row == col {
                d_va += i_bus[row].conj();
                d_vm += i_bus[row].conj() * v_norm[row];
            }
            DsEntry {
                row,
                col,
                d_va: Complex64::i() * v[row] * d_va,
                d_vm,
            }
        })
        .collect()
}
