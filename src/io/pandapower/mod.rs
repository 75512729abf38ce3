pub mod file_io;
pub mod network_converter;
pub use file_io::*;
pub use network_converter::*;
