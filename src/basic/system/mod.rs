pub mod admittance;
pub mod results;
#[allow(clippy::module_inception)]
pub mod system;

pub use admittance::*;
pub use results::*;
pub use system::*;
