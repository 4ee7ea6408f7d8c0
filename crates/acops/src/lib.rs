//! Application deployment and operations against Alibaba Cloud: artifact
//! inspection, start/stop command synthesis, orchestration provisioning and
//! a handful of local and monitoring helpers.

pub mod archive;
pub mod catalog;
pub mod cms;
pub mod config;
pub mod deploy;
pub mod ecs;
pub mod error;
pub mod local;
pub mod logging;
pub mod oos;
pub mod openapi;
pub mod oss;
pub mod project;
pub mod provision;
pub mod retry;
pub mod state;
pub mod synth;

#[cfg(test)]
mod fakes;
