//! Tool catalog: declarative HTTP tool configs compiled into MCP tools.
//!
//! Compilation happens once at service construction and validates methods,
//! templates, and name collisions up front. At call time the catalog renders
//! the request templates against the call arguments and executes the result.

use crate::config::{CoreConfig, ParamConfig, ToolConfig};
use crate::error::{CoreError, Result};
use base64::Engine as _;
use mime::Mime;
use reqwest::{Client, Method};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool, ToolAnnotations};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use toolbridge_template::{RenderOutcome, TemplateContext};
use url::Url;

/// One argument declared by a tool.
#[derive(Debug, Clone)]
struct CompiledParam {
    name: String,
    required: bool,
    default: Option<Value>,
    schema: Value,
}

/// A tool compiled from config, ready to list and invoke.
#[derive(Debug, Clone)]
pub struct CompiledTool {
    /// Name exposed to callers (prefixed `server:name` on collision).
    pub exposed_name: String,
    /// Name as written in the server's config.
    pub original_name: String,
    pub server_id: String,
    pub description: Option<String>,
    method: Method,
    path_template: String,
    /// Server default headers first, then tool headers (later wins).
    header_templates: Vec<(String, String)>,
    body_template: Option<String>,
    params: Vec<CompiledParam>,
    input_schema: Value,
}

/// Everything needed to execute one rendered call.
#[derive(Debug)]
pub struct RenderedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Rendered body text; sent as JSON when it parses as JSON.
    pub body: Option<String>,
}

/// Immutable registry of the tools exposed by a core service.
pub struct ToolCatalog {
    tools: Vec<CompiledTool>,
}

impl ToolCatalog {
    /// Compile every server's tool configs.
    ///
    /// Servers and tools compile in sorted order so collision
    /// disambiguation is deterministic.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid HTTP method or a malformed template.
    pub fn compile(config: &CoreConfig) -> Result<Self> {
        let mut tools: Vec<CompiledTool> = Vec::new();

        let mut server_ids: Vec<&String> = config.servers.keys().collect();
        server_ids.sort();

        for server_id in server_ids {
            let server = &config.servers[server_id];
            let mut tool_names: Vec<&String> = server.tools.keys().collect();
            tool_names.sort();

            for tool_name in tool_names {
                let tool_cfg = &server.tools[tool_name];
                let compiled =
                    compile_tool(server_id, tool_name, &server.headers, tool_cfg)?;
                push_disambiguated(&mut tools, compiled);
            }
        }

        Ok(Self { tools })
    }

    /// List the MCP `Tool`s exposed by this catalog.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|t| {
                let schema_obj = t
                    .input_schema
                    .as_object()
                    .cloned()
                    .unwrap_or_else(JsonObject::new);
                let mut tool = Tool::new(
                    t.exposed_name.clone(),
                    t.description.clone().unwrap_or_default(),
                    Arc::new(schema_obj),
                );
                tool.annotations = Some(annotations_for_method(&t.method));
                tool
            })
            .collect()
    }

    #[must_use]
    pub fn find(&self, tool_name: &str) -> Option<&CompiledTool> {
        self.tools
            .iter()
            .find(|t| t.exposed_name == tool_name || t.original_name == tool_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl CompiledTool {
    /// Render this tool's request material against the call arguments.
    ///
    /// # Errors
    ///
    /// Returns an error for non-object arguments, a missing required
    /// parameter, or a failed template render.
    pub fn build_request(
        &self,
        base_url: &str,
        arguments: &Value,
        env: &HashMap<String, String>,
    ) -> Result<RenderedRequest> {
        let mut data = match arguments {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(CoreError::Runtime(format!(
                    "Tool arguments must be an object, got {other}"
                )));
            }
        };

        for param in &self.params {
            let supplied = data.get(&param.name).is_some_and(|v| !v.is_null());
            if !supplied {
                if let Some(default) = &param.default {
                    data.insert(param.name.clone(), default.clone());
                } else if param.required {
                    return Err(CoreError::Runtime(format!(
                        "Missing required parameter: {}",
                        param.name
                    )));
                }
            }
        }

        let data = Value::Object(data);
        let context = TemplateContext::new(&data, env);

        let mut path = self.render_part("path", &self.path_template, &context)?;
        if !path.starts_with('/') {
            path = format!("/{path}");
        }
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let url = Url::parse(&url)
            .map_err(|e| CoreError::Runtime(format!("Invalid URL '{url}': {e}")))?;

        let mut headers = Vec::with_capacity(self.header_templates.len());
        for (name, template) in &self.header_templates {
            let value = self.render_part(&format!("header '{name}'"), template, &context)?;
            if !value.is_empty() {
                headers.push((name.clone(), value));
            }
        }

        let body = match &self.body_template {
            Some(template) => Some(self.render_part("body", template, &context)?),
            None => None,
        };

        Ok(RenderedRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
        })
    }

    fn render_part(
        &self,
        part: &str,
        template: &str,
        context: &TemplateContext<'_>,
    ) -> Result<String> {
        let RenderOutcome {
            result,
            success,
            error,
            used_variables,
        } = toolbridge_template::render(template, context);
        if success {
            tracing::debug!(
                tool = %self.exposed_name,
                part,
                used = ?used_variables,
                "rendered request template"
            );
            Ok(result)
        } else {
            Err(CoreError::Runtime(format!(
                "Failed to render {part} for tool '{}': {}",
                self.exposed_name,
                error.unwrap_or_else(|| "unknown render failure".to_string())
            )))
        }
    }
}

/// Execute a rendered request and shape the response into a tool result.
///
/// # Errors
///
/// Returns an error on transport failure or a non-2xx response.
pub async fn execute(
    client: &Client,
    request: RenderedRequest,
    timeout: Duration,
) -> Result<CallToolResult> {
    let mut builder = client
        .request(request.method, request.url)
        .timeout(timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        // JSON templates go out as JSON; anything else as plain text.
        builder = match serde_json::from_str::<Value>(&body) {
            Ok(v) => builder.json(&v),
            Err(_) => builder.body(body),
        };
    }

    let response = builder
        .send()
        .await
        .map_err(|e| CoreError::Http(e.without_url().to_string()))?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CoreError::Http(e.without_url().to_string()))?;

    if status.is_success() {
        if is_image_content_type(content_type.as_deref()) {
            let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
            let mime_type = content_type.unwrap_or_else(|| "image/*".to_string());
            return Ok(CallToolResult::success(vec![Content::image(b64, mime_type)]));
        }
        let text = match std::str::from_utf8(&bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
                json!({
                    "encoding": "base64",
                    "mimeType": content_type,
                    "data": b64
                })
                .to_string()
            }
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    } else {
        let body = String::from_utf8_lossy(&bytes);
        let status_code = status.as_u16();
        let reason = status.canonical_reason().unwrap_or("Unknown");
        Err(CoreError::Http(format!(
            "API returned {status_code} {reason}: {body}"
        )))
    }
}

fn is_image_content_type(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return false;
    };
    let Ok(m) = ct.parse::<Mime>() else {
        return false;
    };
    m.type_() == mime::IMAGE
}

fn compile_tool(
    server_id: &str,
    tool_name: &str,
    server_headers: &HashMap<String, String>,
    cfg: &ToolConfig,
) -> Result<CompiledTool> {
    let method: Method = cfg.method.trim().to_uppercase().parse().map_err(|_| {
        CoreError::Config(format!(
            "Invalid HTTP method '{}' in tool '{tool_name}' (server '{server_id}')",
            cfg.method
        ))
    })?;

    let path_vars = toolbridge_template::parse(&cfg.path).map_err(|e| {
        CoreError::Config(format!(
            "Invalid path template in tool '{tool_name}' (server '{server_id}'): {e}"
        ))
    })?;

    let mut header_templates: Vec<(String, String)> = Vec::new();
    let mut header_names: Vec<&String> = server_headers.keys().collect();
    header_names.sort();
    for name in header_names {
        header_templates.push((name.clone(), server_headers[name].clone()));
    }
    let mut tool_header_names: Vec<&String> = cfg.headers.keys().collect();
    tool_header_names.sort();
    for name in tool_header_names {
        header_templates.push((name.clone(), cfg.headers[name].clone()));
    }
    for (name, template) in &header_templates {
        toolbridge_template::parse(template).map_err(|e| {
            CoreError::Config(format!(
                "Invalid template for header '{name}' in tool '{tool_name}' (server '{server_id}'): {e}"
            ))
        })?;
    }
    if let Some(body) = &cfg.body {
        toolbridge_template::parse(body).map_err(|e| {
            CoreError::Config(format!(
                "Invalid body template in tool '{tool_name}' (server '{server_id}'): {e}"
            ))
        })?;
    }

    let params = collect_params(&cfg.params, &path_vars);
    let input_schema = build_input_schema(&params);

    Ok(CompiledTool {
        exposed_name: tool_name.to_string(),
        original_name: tool_name.to_string(),
        server_id: server_id.to_string(),
        description: cfg.description.clone(),
        method,
        path_template: cfg.path.clone(),
        header_templates,
        body_template: cfg.body.clone(),
        params,
        input_schema,
    })
}

fn collect_params(
    params: &HashMap<String, ParamConfig>,
    path_vars: &[toolbridge_template::TemplateVariable],
) -> Vec<CompiledParam> {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort();

    names
        .into_iter()
        .map(|name| {
            let p = &params[name];
            // Params referenced as required path placeholders default to
            // required; everything else defaults to optional.
            let required_default = path_vars
                .iter()
                .any(|v| v.path == *name && v.required);
            CompiledParam {
                name: name.clone(),
                required: p.required.unwrap_or(required_default),
                default: p.default.clone(),
                schema: p
                    .schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "string"})),
            }
        })
        .collect()
}

fn build_input_schema(params: &[CompiledParam]) -> Value {
    let mut properties = json!({});
    let mut required: Vec<String> = Vec::new();

    for param in params {
        let mut prop_schema = param.schema.clone();
        if let Some(default) = &param.default {
            prop_schema["default"] = default.clone();
        }
        properties[&param.name] = prop_schema;

        if param.required && param.default.is_none() {
            required.push(param.name.clone());
        }
    }

    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// On a cross-server name collision both tools get a `server:name` prefix.
fn push_disambiguated(tools: &mut Vec<CompiledTool>, mut tool: CompiledTool) {
    let collision = tools
        .iter()
        .position(|t| t.exposed_name == tool.exposed_name && t.server_id != tool.server_id);

    if let Some(existing_idx) = collision {
        let existing = &mut tools[existing_idx];
        existing.exposed_name = format!("{}:{}", existing.server_id, existing.original_name);
        tool.exposed_name = format!("{}:{}", tool.server_id, tool.original_name);
        tracing::warn!(
            tool = %tool.original_name,
            "tool name collision across servers; exposing prefixed names"
        );
    }
    tools.push(tool);
}

/// MCP tool annotations from RFC 9110-style method semantics.
/// `openWorldHint` is always true: these tools talk to an external system.
fn annotations_for_method(method: &Method) -> ToolAnnotations {
    // (read_only, destructive, idempotent)
    let hints = if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
        (Some(true), Some(false), Some(true))
    } else if *method == Method::POST {
        (Some(false), Some(false), Some(false))
    } else if *method == Method::PUT || *method == Method::DELETE {
        (Some(false), Some(true), Some(true))
    } else if *method == Method::PATCH {
        // PATCH may or may not be idempotent; do not guess.
        (Some(false), Some(true), None)
    } else {
        (None, None, None)
    };

    ToolAnnotations {
        title: None,
        read_only_hint: hints.0,
        destructive_hint: hints.1,
        idempotent_hint: hints.2,
        open_world_hint: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::ToolCatalog;
    use crate::config::CoreConfig;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn config_from_json(v: Value) -> CoreConfig {
        serde_json::from_value(v).expect("valid config")
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn compile_builds_input_schema_with_required_and_defaults() {
        let config = config_from_json(json!({
            "servers": {
                "petstore": {
                    "baseUrl": "http://127.0.0.1:1",
                    "tools": {
                        "getPet": {
                            "method": "get",
                            "path": "/pets/{{id}}",
                            "params": {
                                "id": {"schema": {"type": "string"}},
                                "verbose": {"required": false, "default": "false"}
                            }
                        }
                    }
                }
            }
        }));

        let catalog = ToolCatalog::compile(&config).expect("compile");
        let tools = catalog.list_tools();
        assert_eq!(tools.len(), 1);

        let schema = Value::Object(tools[0].input_schema.as_ref().clone());
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        assert!(required.contains(&json!("id")));
        assert!(!required.contains(&json!("verbose")));

        let default_verbose = schema
            .pointer("/properties/verbose/default")
            .cloned();
        assert_eq!(default_verbose, Some(json!("false")));

        // GET tools advertise read-only semantics.
        let annotations = tools[0].annotations.as_ref().expect("annotations");
        assert_eq!(annotations.read_only_hint, Some(true));
        assert_eq!(annotations.open_world_hint, Some(true));
    }

    #[test]
    fn compile_rejects_invalid_method_and_template() {
        let bad_method = config_from_json(json!({
            "servers": {"s": {"baseUrl": "http://x", "tools": {
                "t": {"method": "FETCH IT", "path": "/"}
            }}}
        }));
        assert!(ToolCatalog::compile(&bad_method).is_err());

        let bad_template = config_from_json(json!({
            "servers": {"s": {"baseUrl": "http://x", "tools": {
                "t": {"method": "GET", "path": "/x/{{broken"}
            }}}
        }));
        assert!(ToolCatalog::compile(&bad_template).is_err());
    }

    #[test]
    fn cross_server_collisions_expose_prefixed_names() {
        let config = config_from_json(json!({
            "servers": {
                "alpha": {"baseUrl": "http://a", "tools": {
                    "search": {"method": "GET", "path": "/search"}
                }},
                "beta": {"baseUrl": "http://b", "tools": {
                    "search": {"method": "GET", "path": "/find"}
                }}
            }
        }));

        let catalog = ToolCatalog::compile(&config).expect("compile");
        let mut names: Vec<String> = catalog
            .list_tools()
            .iter()
            .map(|t| t.name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["alpha:search", "beta:search"]);

        // Original names still route.
        assert!(catalog.find("alpha:search").is_some());
    }

    #[test]
    fn build_request_renders_path_headers_and_body() {
        let config = config_from_json(json!({
            "servers": {
                "api": {
                    "baseUrl": "http://127.0.0.1:1",
                    "headers": {"x-default": "on"},
                    "tools": {
                        "createNote": {
                            "method": "POST",
                            "path": "/notes/{{folder}}",
                            "headers": {"x-trace": "{{trace?}}"},
                            "body": "{\"title\": \"{{title}}\"}",
                            "params": {
                                "folder": {},
                                "title": {"required": true}
                            }
                        }
                    }
                }
            }
        }));

        let catalog = ToolCatalog::compile(&config).expect("compile");
        let tool = catalog.find("createNote").expect("tool");

        let request = tool
            .build_request(
                "http://127.0.0.1:1",
                &json!({"folder": "inbox", "title": "hello"}),
                &no_env(),
            )
            .expect("build_request");

        assert_eq!(request.url.path(), "/notes/inbox");
        assert_eq!(request.method, reqwest::Method::POST);
        // Optional header with absent variable renders empty and is dropped.
        assert!(request.headers.iter().any(|(n, v)| n == "x-default" && v == "on"));
        assert!(!request.headers.iter().any(|(n, _)| n == "x-trace"));
        assert_eq!(request.body.as_deref(), Some("{\"title\": \"hello\"}"));
    }

    #[test]
    fn build_request_rejects_missing_required_parameter() {
        let config = config_from_json(json!({
            "servers": {"api": {"baseUrl": "http://127.0.0.1:1", "tools": {
                "getUser": {"method": "GET", "path": "/users/{{id}}", "params": {"id": {}}}
            }}}
        }));
        let catalog = ToolCatalog::compile(&config).expect("compile");
        let tool = catalog.find("getUser").expect("tool");

        let err = tool
            .build_request("http://127.0.0.1:1", &json!({}), &no_env())
            .expect_err("must fail");
        assert!(err.to_string().contains("Missing required parameter: id"));
    }

    #[test]
    fn build_request_applies_declared_defaults() {
        let config = config_from_json(json!({
            "servers": {"api": {"baseUrl": "http://127.0.0.1:1", "tools": {
                "list": {
                    "method": "GET",
                    "path": "/items?limit={{limit}}",
                    "params": {"limit": {"required": false, "default": 25}}
                }
            }}}
        }));
        let catalog = ToolCatalog::compile(&config).expect("compile");
        let tool = catalog.find("list").expect("tool");

        let request = tool
            .build_request("http://127.0.0.1:1", &json!({}), &no_env())
            .expect("build_request");
        assert_eq!(request.url.query(), Some("limit=25"));
    }
}
