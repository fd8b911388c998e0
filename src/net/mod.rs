//! Networking support shared by the consul and redis clients.

pub mod tls;
