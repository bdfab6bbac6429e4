//! Statefeed - table change feed over Redis keyspace notifications.
//!
//! A table is a set of store hashes sharing a `<table><separator>` key
//! prefix. Statefeed turns such a table into an ordered stream of row
//! changes: one snapshot of its current contents, followed by live changes
//! decoded from keyspace notifications. Alongside it sits a command pipeline
//! that batches writes and hands their replies back strictly in order.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Caller run-loop (consumer::select)            │
//! └───────────────────────────────────────────────────────────────┘
//!                 │ readiness                    │ pop()
//! ┌───────────────────────────────────────────────────────────────┐
//! │  SubscriberStateTable = ConsumerTableBase<KeyspaceSource>     │
//! │     snapshot │ raw notification queue │ decoded change FIFO   │
//! └───────────────────────────────────────────────────────────────┘
//!        │ PSUBSCRIBE                         │ KEYS / HGETALL
//! ┌────────────────────────┐   ┌──────────────────────────────────┐
//! │ redis::Connection      │   │ redis::RedisTable over           │
//! │ (subscription)         │   │ redis::RedisPipeline             │
//! └────────────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error types
//!
//! ## Store client
//! - [`redis::protocol`] - RESP2 parser, encoder and streaming codec
//! - [`redis::connection`] - Connections and connectors
//! - [`redis::pipeline`] - Ordered command pipelining
//! - [`redis::table`] - Table accessors
//!
//! ## Change feed
//! - [`consumer::base`] - Buffered consumer with injected refill
//! - [`consumer::subscriber`] - Snapshot plus notification consumer
//! - [`consumer::select`] - Readiness multiplexer
//!
//! ## CLI
//! - [`cli`] - Command-line interface

// Core infrastructure
pub mod core;

// Store client
pub mod redis;

// Change feed
pub mod consumer;

// CLI
pub mod cli;

pub use self::core::{config, error};
pub use consumer::{KeyOpFieldsValues, Operation, SubscriberStateTable};
pub use redis::{DbConnector, RedisPipeline};
