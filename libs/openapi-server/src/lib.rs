//! Request/response models shared by the autodeploy server and CLI client

pub mod models;
