//! Core request/response forwarding engine: connection state machines,
//! scheduling, rule-based routing, and the Frang rate/size limiter,
//! independent of any concrete transport, parser, or cache implementation.

pub mod cache;
pub mod cliconn;
pub mod config;
pub mod engine;
pub mod error;
pub mod frang;
pub mod hash;
pub mod message;
pub mod parser;
pub mod rule_grammar;
pub mod rules;
pub mod scheduler;
pub mod srvconn;
pub mod transport;

pub use cache::Cache;
pub use cliconn::CliConn;
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use frang::FrangLimiter;
pub use message::{Request, Response};
pub use scheduler::Registry;
pub use srvconn::SrvConn;
pub use transport::{ClientTransport, ServerTransport};
