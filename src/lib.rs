//! A pandapower grid backend with substation bus splitting.
//!
//! Grids are loaded from pandapower JSON or CSV tables, every substation gets
//! a second bus, and actions move elements between the two before a power
//! flow is run on the modified tables.

pub mod backend;
pub mod basic;
pub mod config;
pub mod error;
pub mod io;

pub mod prelude {
    pub use crate::backend::*;
    pub use crate::basic::*;
    pub use crate::config::PowerFlowConfig;
    pub use crate::error::{BackendError, ConvergenceFailure, Result};
    pub use crate::io::pandapower;
}
