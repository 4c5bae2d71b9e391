//! Toolbridge core: adapt declarative HTTP APIs into callable MCP tool
//! definitions.
//!
//! The core composes four pieces:
//! - the template engine (`toolbridge-template`) renders request material,
//! - the [`connection::ConnectionManager`] tracks per-server connectivity,
//!   retries, and heartbeats,
//! - the [`performance::PerformanceMonitor`] turns per-call timings into
//!   statistics,
//! - the [`service::ServiceFactory`] assembles them into deployment shapes.
//!
//! The MCP wire protocol itself is external; this crate only produces and
//! consumes its model types.

pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod performance;
pub mod resources;
pub mod service;
pub mod status;

pub use config::{ConnectionSettings, CoreConfig, ServerConfig, load_config};
pub use connection::{
    ConnState, ConnectionEvent, ConnectionEventKind, ConnectionManager, ConnectionStatus,
    HttpTransport, Transport,
};
pub use error::{CoreError, Result};
pub use performance::{CallOutcome, PerformanceMetrics, PerformanceMonitor, PerformanceStats};
pub use resources::{SystemResourceUsage, SystemResources};
pub use service::{
    CliAggregator, CoreService, GroupConfig, GroupService, ServiceFactory, ToolService,
};
