pub mod config;
pub mod engines;
pub mod transcribe;

pub use config::*;
pub use engines::*;
pub use transcribe::*;
