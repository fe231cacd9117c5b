pub mod cds;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod grid;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod safety;
