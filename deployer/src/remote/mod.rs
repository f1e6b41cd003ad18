//! Remote host configuration over ssh

pub mod engine;
pub mod rewrite;
pub mod session;
pub mod unit;
