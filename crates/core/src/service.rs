//! Service shapes and the factory that assembles them.
//!
//! Three deployment shapes share the [`ToolService`] capability: the always-
//! constructible [`CoreService`], and two extension points ([`GroupService`],
//! [`CliAggregator`]) whose implementations do not exist yet. The factory
//! refuses to build the incomplete shapes with a deterministic error — never
//! a degraded object that silently satisfies the interface.

use crate::catalog::{self, ToolCatalog};
use crate::config::{self, CoreConfig};
use crate::connection::{
    ConnState, ConnectionEvent, ConnectionManager, ConnectionStatus, HttpTransport,
};
use crate::error::{CoreError, Result};
use crate::performance::{
    CallOutcome, PerformanceMetrics, PerformanceMonitor, PerformanceStats,
};
use crate::resources::{SystemResourceUsage, SystemResources};
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Configuration for the (not yet available) group wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    pub name: String,
    pub servers: Vec<String>,
}

/// The capability every service shape exposes.
#[async_trait]
pub trait ToolService: Send + Sync {
    fn list_tools(&self) -> Vec<Tool>;

    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<CallToolResult>;
}

/// The minimal, always-constructible composition: template engine + tool
/// catalog + connection manager + performance monitor.
pub struct CoreService {
    config: CoreConfig,
    catalog: ToolCatalog,
    connections: Arc<ConnectionManager>,
    monitor: Arc<PerformanceMonitor>,
    resources: SystemResources,
    client: reqwest::Client,
    env: HashMap<String, String>,
}

impl CoreService {
    /// Invoke a tool: render the request material, gate on the server's
    /// connection state (dialing on demand), execute, and report the
    /// outcome and timing to the performance monitor.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown tool, a failed render, a server in
    /// `Failed` state, or a failed HTTP call.
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<CallToolResult> {
        let _guard = self.monitor.begin_call();
        let started = Instant::now();
        let result = self.invoke_inner(tool_name, arguments).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.monitor.record(CallOutcome {
            success: result.is_ok(),
            latency_ms,
            cache_hit: false,
        });
        result
    }

    async fn invoke_inner(&self, tool_name: &str, arguments: Value) -> Result<CallToolResult> {
        let tool = self
            .catalog
            .find(tool_name)
            .ok_or_else(|| CoreError::Runtime(format!("Tool not found: {tool_name}")))?;
        let server = self.config.servers.get(&tool.server_id).ok_or_else(|| {
            CoreError::Runtime(format!(
                "Tool '{tool_name}' references unknown server '{}'",
                tool.server_id
            ))
        })?;

        let request = tool.build_request(&server.base_url, &arguments, &self.env)?;

        match self.connections.state(&tool.server_id)? {
            ConnState::Failed => {
                return Err(CoreError::Connection(format!(
                    "server '{}' is in failed state; reset required",
                    tool.server_id
                )));
            }
            ConnState::Connected => {}
            _ => self.connections.connect(&tool.server_id).await?,
        }

        catalog::execute(&self.client, request, server.connection.timeout()).await
    }

    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.catalog.list_tools()
    }

    /// Dial every registered server. Individual failures are reported via
    /// connection events and logged, not fatal.
    pub async fn connect_all(&self) {
        let mut ids = self.connections.server_ids();
        ids.sort();
        for id in ids {
            if let Err(e) = self.connections.connect(&id).await {
                tracing::warn!(server = %id, error = %e, "initial connect failed");
            }
        }
    }

    pub fn shutdown(&self) {
        self.connections.shutdown();
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    #[must_use]
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connections.subscribe()
    }

    #[must_use]
    pub fn connection_statuses(&self) -> HashMap<String, ConnectionStatus> {
        self.connections.statuses()
    }

    #[must_use]
    pub fn metrics(&self) -> PerformanceMetrics {
        self.monitor.snapshot()
    }

    #[must_use]
    pub fn stats(&self) -> PerformanceStats {
        self.monitor.stats()
    }

    #[must_use]
    pub fn resource_usage(&self) -> SystemResourceUsage {
        let (active, idle) = self.connections.connection_counts();
        self.resources.collect(active, idle)
    }
}

#[async_trait]
impl ToolService for CoreService {
    fn list_tools(&self) -> Vec<Tool> {
        CoreService::list_tools(self)
    }

    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<CallToolResult> {
        CoreService::invoke(self, tool_name, arguments).await
    }
}

/// Fan-out wrapper over multiple upstreams.
///
/// Not yet constructible: the `Infallible` field means no value of this type
/// can exist until the implementation lands, so the factory's refusal is
/// enforced by the type system as well.
#[derive(Debug)]
pub struct GroupService {
    never: Infallible,
}

#[async_trait]
impl ToolService for GroupService {
    fn list_tools(&self) -> Vec<Tool> {
        match self.never {}
    }

    async fn invoke(&self, _tool_name: &str, _arguments: Value) -> Result<CallToolResult> {
        match self.never {}
    }
}

/// Command-line-oriented aggregation view over a core service.
///
/// Not yet constructible; see [`GroupService`].
#[derive(Debug)]
pub struct CliAggregator {
    never: Infallible,
}

#[async_trait]
impl ToolService for CliAggregator {
    fn list_tools(&self) -> Vec<Tool> {
        match self.never {}
    }

    async fn invoke(&self, _tool_name: &str, _arguments: Value) -> Result<CallToolResult> {
        match self.never {}
    }
}

/// Stateless assembler for the service shapes.
pub struct ServiceFactory;

impl ServiceFactory {
    /// Compose a core service from config. Always succeeds for a valid
    /// config with a (possibly empty) `servers` mapping; repeated calls
    /// yield independent instances sharing no state.
    ///
    /// # Errors
    ///
    /// Returns an error if the config fails structural validation or a tool
    /// fails to compile.
    pub fn create_core_service(config: CoreConfig) -> Result<CoreService> {
        config::validate(&config)?;
        let catalog = ToolCatalog::compile(&config)?;
        let client = reqwest::Client::new();
        let connections = Arc::new(ConnectionManager::new(Arc::new(HttpTransport::new(
            client.clone(),
        ))));
        for (server_id, server) in &config.servers {
            connections.register(server_id.clone(), server.base_url.clone(), server.connection)?;
        }
        tracing::info!(
            servers = config.servers.len(),
            tools = catalog.len(),
            "core service assembled"
        );

        Ok(CoreService {
            config,
            catalog,
            connections,
            monitor: Arc::new(PerformanceMonitor::new()),
            resources: SystemResources::new(),
            client,
            env: std::env::vars().collect(),
        })
    }

    /// Extension point for the group wrapper.
    ///
    /// # Errors
    ///
    /// Always fails until the implementation exists.
    pub fn create_group_service_wrapper(
        _core: &CoreService,
        _group: &GroupConfig,
    ) -> Result<GroupService> {
        Err(CoreError::NotImplemented(
            "GroupMcpService implementation not yet available".to_string(),
        ))
    }

    /// Extension point for the CLI aggregator.
    ///
    /// # Errors
    ///
    /// Always fails until the implementation exists.
    pub fn create_cli_aggregator(_core: &CoreService) -> Result<CliAggregator> {
        Err(CoreError::NotImplemented(
            "CliMcpAggregator implementation not yet available".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{GroupConfig, ServiceFactory};
    use crate::config::CoreConfig;
    use crate::error::CoreError;
    use serde_json::json;

    #[test]
    fn empty_config_yields_usable_core_service() {
        let service =
            ServiceFactory::create_core_service(CoreConfig::default()).expect("core service");
        assert!(service.list_tools().is_empty());
        assert!(service.connection_statuses().is_empty());
        assert_eq!(service.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn instances_share_no_state() {
        let first =
            ServiceFactory::create_core_service(CoreConfig::default()).expect("core service");
        let second =
            ServiceFactory::create_core_service(CoreConfig::default()).expect("core service");

        // Even a failed invoke is recorded against its own monitor only.
        let err = first.invoke("missing", json!({})).await.expect_err("unknown tool");
        assert!(err.to_string().contains("Tool not found"));

        assert_eq!(first.stats().total_requests, 1);
        assert_eq!(first.stats().failed_requests, 1);
        assert_eq!(second.stats().total_requests, 0);
    }

    #[test]
    fn group_wrapper_fails_fast_with_distinct_error() {
        let core =
            ServiceFactory::create_core_service(CoreConfig::default()).expect("core service");
        let group = GroupConfig {
            name: "test".to_string(),
            servers: Vec::new(),
        };

        let err = ServiceFactory::create_group_service_wrapper(&core, &group)
            .expect_err("must not construct");
        assert!(matches!(err, CoreError::NotImplemented(_)));
        assert!(
            err.to_string()
                .contains("GroupMcpService implementation not yet available")
        );
    }

    #[test]
    fn cli_aggregator_fails_fast_with_distinct_error() {
        let core =
            ServiceFactory::create_core_service(CoreConfig::default()).expect("core service");

        let err = ServiceFactory::create_cli_aggregator(&core).expect_err("must not construct");
        assert!(matches!(err, CoreError::NotImplemented(_)));
        assert!(
            err.to_string()
                .contains("CliMcpAggregator implementation not yet available")
        );
    }
}
