//! Infrastructure decisions

pub mod decider;
pub mod spec;
