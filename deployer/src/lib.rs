//! Autodeploy Library
//!
//! Turns a free-text deployment request and a repository URL into a running
//! cloud workload: decide the infrastructure, render and apply Terraform, then
//! configure the host over ssh or ship a container image.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod exec;
pub mod http;
pub mod iac;
pub mod infra;
pub mod intake;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod provision;
pub mod remote;
pub mod server;
pub mod storage;
pub mod utils;
