//! Concolic execution engine: CLI wiring around the `concolic-core`,
//! `concolic-trace`, `concolic-tools`, and `concolic-agents` crates.

pub mod cli;
