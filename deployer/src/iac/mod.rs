//! Infrastructure-as-code generation

pub mod generator;
pub mod templates;
