//! Probe the batch system a job runs in and select a matching MPI launcher setup.

pub mod batch;
pub mod config;
pub mod env;
pub mod environment;
pub mod exec;
pub mod mpi;
pub mod resources;
pub mod script;
