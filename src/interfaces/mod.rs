//! Batch input and report output for the command-line binary.

pub mod batch;
pub mod csv;
