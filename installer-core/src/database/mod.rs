pub mod admin;
pub mod connection;
pub mod provisioning;
