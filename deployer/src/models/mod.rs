//! Data models

pub mod analysis;
pub mod intent;
pub mod job;
