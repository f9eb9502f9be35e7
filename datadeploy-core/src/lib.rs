#![doc = "datadeploy-core: core logic library for datadeploy."]

//! This crate contains the job orchestration, record normalization and
//! deploy/retrieve drivers. It never talks to the network itself: every
//! remote call goes through the [`contract::Connection`] capability passed in
//! by the caller.
//!
//! # Usage
//! Load a [`config::DeploymentConfig`], construct a connection, then call
//! [`deploy::deploy`] or [`retrieve::retrieve`] with a [`run::RunOptions`].

pub mod config;
pub mod contract;
pub mod deploy;
pub mod error;
pub mod job;
pub mod paths;
pub mod query;
pub mod report;
pub mod retrieve;
pub mod run;
pub mod transform;
