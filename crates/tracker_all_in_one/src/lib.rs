pub mod config;
pub mod scanner_simulator;
