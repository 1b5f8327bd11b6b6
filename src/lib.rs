//! NetCap deployer library
//!
//! Creates, checks and removes a NetCap traffic-capture deployment in a
//! Kubernetes cluster.

pub mod check;
pub mod config;
pub mod error;
pub mod k8s;
