//! Command implementations for the flowcast CLI

pub mod read;
pub mod serve;
