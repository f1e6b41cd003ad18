//! Job tracking

pub mod registry;
