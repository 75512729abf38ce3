pub(crate) mod dcpf;
pub(crate) mod dsbus_dv;
pub mod engine;
pub(crate) mod newtonpf;
pub mod solver;
pub mod system;

pub use engine::*;
pub use newtonpf::newton_pf;
