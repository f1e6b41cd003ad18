//! Deployment pipeline

pub mod context;
pub mod docker;
pub mod executor;
pub mod fsm;
