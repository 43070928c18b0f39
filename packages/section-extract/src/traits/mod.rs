//! Core trait abstractions for the section extraction library.
//!
//! These traits define the interfaces that applications implement
//! to provide storage and model-backed services.

pub mod ai;
pub mod store;
