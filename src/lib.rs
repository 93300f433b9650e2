//! Pullstat collects point-in-time metric snapshots for a pull-based
//! monitoring agent. Each invocation performs exactly one collection pass
//! against an external source and hands the agent a mapping of metric name
//! to value, plus the static graph metadata the agent needs to render those
//! values and to decide which of them are counters to be differenced.
//!
//! Two sources are supported:
//!
//!  * The CloudWatch metrics API, for EC2 CPU credit usage and balance.
//!  * The PostgreSQL `pg_stat_database` statistics view, for commit, block
//!    and row counters.
//!
//! The `plugin` module implements the agent-facing host: metadata emission,
//! value emission and differencing against the previous snapshot.
#![allow(unknown_lints)]
#![deny(trivial_numeric_casts, missing_docs, unstable_features, unused_import_braces)]
extern crate chrono;
extern crate clap;
extern crate fern;
extern crate hyper;
extern crate rusoto_cloudwatch;
extern crate rusoto_core;
extern crate serde;
extern crate serde_json;
extern crate sqlx;
extern crate tokio;
extern crate toml;

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde_derive;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
extern crate tempdir;

pub mod cloudwatch;
pub mod collector;
pub mod config;
pub mod ec2metadata;
pub mod error;
pub mod graph;
pub mod logging;
pub mod metric;
pub mod plugin;
