//! Infrastructure provisioning

pub mod terraform;
