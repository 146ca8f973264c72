//! The decompilation pipeline: backends, bytecode repair, agent recovery,
//! the per-artifact controller and the directory fan-out.

pub mod backend;
pub mod controller;
pub mod fanout;
pub mod llm;
pub mod repair;

pub use controller::{decompile_file, decompile_single_file};
pub use fanout::{decompile_directory, run_directory};
