//! Client side of the HTTP API

pub mod client;
