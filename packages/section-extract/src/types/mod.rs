//! Data types for the section extraction library.

pub mod candidate;
pub mod config;
pub mod extraction;
pub mod node;
pub mod outcome;
pub mod segment;
pub mod traversal;
