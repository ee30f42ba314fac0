//! Prometheus exporter for AWS resource state not exposed by CloudWatch.
//!
//! This crate polls AWS APIs on a fixed interval for resource inventory that
//! has no native CloudWatch metric (VPC subnet address capacity, EventBridge
//! partner event source state) and exposes it via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │    AWS APIs     │────>│    Refresher    │────>│    Registry     │
//! │ (EC2, Events)   │     │ (fetch+publish) │     │ (HTTP /metrics) │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! The refresher is the only writer into the registry; scrape requests read
//! concurrently and are never blocked behind an in-flight AWS call.
//!
//! # Configuration
//!
//! Everything is read from the environment at startup; see
//! [`config::ExporterConfig`].

pub mod aws;
pub mod config;
pub mod http;
pub mod normalize;
pub mod refresh;
pub mod registry;

pub use aws::AwsClients;
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use refresh::Refresher;
pub use registry::{MetricRegistry, SharedRegistry};
