//! End-to-end test harness for virtink.
//!
//! Provisions the pinned tools, builds the images under test, brings up a kind
//! cluster, deploys virtink with its dependencies and runs the kuttl suite.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

#[macro_use]
mod macros;

pub mod app;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod deploy;
pub mod exec;
pub mod images;
pub mod pipeline;
pub mod suite;
pub mod tools;
