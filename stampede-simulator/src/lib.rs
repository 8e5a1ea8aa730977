// Stampede Simulator Library

pub mod models;
pub mod runner;
pub mod stats;
pub mod workload;
