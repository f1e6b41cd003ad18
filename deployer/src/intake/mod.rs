//! Request intake: intent classification and repository analysis

pub mod analyzer;
pub mod classifier;
