use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Represents an admittance value in a power system.
///
/// `Admittance` is a wrapper around a complex number in per unit of the system base.
#[derive(Clone, Copy, Default, PartialEq, Debug, Serialize, Deserialize)]
pub struct Admittance(pub Complex64);

/// Two-port π model of a branch in per unit of the system base.
///
/// The off-nominal tap and the phase shift sit on the `from` side,
/// following the usual `yff/yft/ytf/ytt` convention.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchAdmittance {
    pub yff: Complex64,
    pub yft: Complex64,
    pub ytf: Complex64,
    pub ytt: Complex64,
    /// Series reactance, used by the DC approximation.
    pub x_series: f64,
    /// Off-nominal tap magnitude.
    pub tap: f64,
    /// Phase shift in radians.
    pub shift: f64,
}

impl BranchAdmittance {
    /// Builds the two-port from a series admittance and the total shunt admittance
    /// split evenly between both ends.
    pub fn pi_section(y_series: Admittance, y_shunt: Admittance, tap: f64, shift: f64) -> Self {
        let ys = y_series.0;
        let half = 0.5 * y_shunt.0;
        let a = Complex64::from_polar(tap, shift);
        let x_series = (1.0 / ys).im;
        Self {
            yff: (ys + half) / (tap * tap),
            yft: -ys / a.conj(),
            ytf: -ys / a,
            ytt: ys + half,
            x_series,
            tap,
            shift,
        }
    }

    /// Currents injected into the branch at both ends.
    pub fn currents(&self, vf: Complex64, vt: Complex64) -> (Complex64, Complex64) {
        (self.yff * vf + self.yft * vt, self.ytf * vf + self.ytt * vt)
    }

    /// DC susceptance of the series element, scaled by the tap.
    pub fn b_dc(&self) -> f64 {
        1.0 / (self.x_series * self.tap)
    }
}

/// An active branch between two internal bus rows.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchPorts {
    pub from: usize,
    pub to: usize,
    pub y: BranchAdmittance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pi_section_is_symmetric_without_tap() {
        let y = BranchAdmittance::pi_section(
            Admittance(Complex64::new(1.0, -10.0)),
            Admittance(Complex64::new(0.0, 0.02)),
            1.0,
            0.0,
        );
        assert_eq!(y.yft, y.ytf);
        assert_eq!(y.yff, y.ytt);
        assert!((y.yff - Complex64::new(1.0, -9.99)).norm() < 1e-12);
        // no current through a branch between equal voltages apart from charging
        let (i_f, i_t) = y.currents(Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0));
        assert!((i_f - Complex64::new(0.0, 0.01)).norm() < 1e-12);
        assert!((i_t - Complex64::new(0.0, 0.01)).norm() < 1e-12);
    }

    #[test]
    fn test_dc_susceptance() {
        let y = BranchAdmittance::pi_section(
            Admittance(1.0 / Complex64::new(0.0, 0.1)),
            Admittance::default(),
            1.0,
            0.0,
        );
        assert!((y.b_dc() - 10.0).abs() < 1e-12);
    }
}
