use rsparse::{
    data::{self, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::Solve;

/// Sparse LU solver backed by `rsparse`.
///
/// The symbolic analysis is kept between calls, so one instance must only
/// see matrices with the same sparsity pattern until [`Solve::reset`].
#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    symbolic: Option<Symb>,
}

#[allow(non_snake_case)]
impl Solve for RSparseSolver {
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), &'static str> {
        if Ap.len() != n + 1 || b.len() != n {
            return Err("dimension mismatch");
        }
        // the ordering of `sqr` underflows below two columns
        match n {
            0 => return Ok(()),
            1 => {
                let pivot: f64 = Ax[Ap[0]..Ap[1]].iter().sum();
                if pivot == 0.0 || !pivot.is_finite() {
                    return Err("singular matrix");
                }
                b[0] /= pivot;
                return Ok(());
            }
            _ => {}
        }
        let a = data::Sprs {
            m: n,
            n,
            i: Ai.to_vec(),
            p: Ap.iter().map(|&v| v as isize).collect(),
            x: Ax.to_vec(),
            nzmax: Ax.len(),
        };
        let s = self.symbolic.get_or_insert_with(|| sqr(&a, 1, false));
        if self.x.len() != n {
            self.x = vec![0.0; n];
        }
        let num = lu(&a, s, 1e-6).map_err(|_| "LU factorization failed")?;
        ipvec(&num.pinv, b, &mut self.x); // x = P*b
        lsolve(&num.l, &mut self.x); // x = L\x
        usolve(&num.u, &mut self.x); // x = U\x
        ipvec(&s.q, &self.x, b); // b = Q*x
        if b.iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err("singular matrix")
        }
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => {
            for k in 0..b.len() {
                x[pvec[k] as usize] = b[k];
            }
        }
        None => x.copy_from_slice(b),
    }
}
