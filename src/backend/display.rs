use std::fmt;

use tabled::Tabled;

/// A float printed with a fixed number of decimal places.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1$}", self.value, self.precision)
    }
}

/// Table row for branch results.
#[derive(Debug, Tabled)]
pub(crate) struct LineResTable {
    pub(crate) name: String,
    pub(crate) status: bool,
    pub(crate) p_or_mw: FloatWrapper,
    pub(crate) q_or_mvar: FloatWrapper,
    pub(crate) v_or_kv: FloatWrapper,
    pub(crate) a_or: FloatWrapper,
    pub(crate) p_ex_mw: FloatWrapper,
    pub(crate) q_ex_mvar: FloatWrapper,
    pub(crate) v_ex_kv: FloatWrapper,
    pub(crate) a_ex: FloatWrapper,
    pub(crate) rho: FloatWrapper, // max(a_or, a_ex) / thermal limit
}

/// Table row for generator and load results.
#[derive(Debug, Tabled)]
pub(crate) struct InjectionResTable {
    pub(crate) name: String,
    pub(crate) sub: usize,
    pub(crate) p_mw: FloatWrapper,
    pub(crate) q_mvar: FloatWrapper,
    pub(crate) v_kv: FloatWrapper,
}
