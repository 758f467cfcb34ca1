//! Live system introspection server.
//!
//! Metrics, processes, sockets and firewall state are sampled from a
//! [`source::MetricSource`], turned into payloads by [`metrics::Collector`]
//! and served over plain GETs and a multiplexed event stream.

pub mod api;
pub mod auth;
pub mod config;
pub mod control;
pub mod error;
pub mod exec;
pub mod gpu;
pub mod lookup;
pub mod metrics;
pub mod rate;
pub mod sockets;
pub mod source;
pub mod state;
pub mod stream;
pub mod tls;
pub mod types;
