//! End-to-end invoke flow against a local echo server: template rendering,
//! connection gating, HTTP execution, and telemetry recording.

use serde_json::{Value, json};
use toolbridge_core::config::CoreConfig;
use toolbridge_core::connection::ConnState;
use toolbridge_core::service::ServiceFactory;
use toolbridge_test_support::spawn_echo_server;

fn echo_config(base_url: &str) -> CoreConfig {
    serde_json::from_value(json!({
        "servers": {
            "echo": {
                "baseUrl": base_url,
                "connection": {
                    "timeoutMs": 2000,
                    "maxRetries": 2,
                    "retryIntervalMs": 100
                },
                "headers": {"x-default": "1"},
                "tools": {
                    "getUser": {
                        "method": "GET",
                        "path": "/users/{{id}}?q={{q?}}",
                        "headers": {"x-trace": "{{trace?}}"},
                        "params": {
                            "id": {},
                            "q": {"required": false},
                            "trace": {"required": false}
                        }
                    },
                    "createNote": {
                        "method": "POST",
                        "path": "/notes",
                        "body": "{\"title\": \"{{title}}\"}",
                        "params": {"title": {"required": true}}
                    }
                }
            }
        }
    }))
    .expect("valid config")
}

fn echoed_body(result: &rmcp::model::CallToolResult) -> Value {
    let v = serde_json::to_value(result).expect("CallToolResult serializes");
    let text = v
        .get("content")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("text"))
        .and_then(Value::as_str)
        .expect("content[0].text");
    serde_json::from_str(text).expect("echo json")
}

#[tokio::test]
async fn invoke_renders_executes_and_records() {
    let echo = spawn_echo_server().await.expect("echo server");
    let service =
        ServiceFactory::create_core_service(echo_config(&echo.base_url)).expect("core service");

    service.connect_all().await;
    let status = service
        .connection_statuses()
        .remove("echo")
        .expect("echo status");
    assert!(status.connected);
    assert_eq!(status.attempts, Some(0));

    let result = service
        .invoke("getUser", json!({"id": "123", "q": "hello", "trace": "t-1"}))
        .await
        .expect("invoke getUser");
    let echoed = echoed_body(&result);
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["path"], "/users/123");
    assert_eq!(echoed["query"], "q=hello");
    assert_eq!(echoed["headers"]["x-default"], "1");
    assert_eq!(echoed["headers"]["x-trace"], "t-1");

    let result = service
        .invoke("createNote", json!({"title": "hello"}))
        .await
        .expect("invoke createNote");
    let echoed = echoed_body(&result);
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["path"], "/notes");
    let body: Value =
        serde_json::from_str(echoed["body"].as_str().expect("body")).expect("body json");
    assert_eq!(body["title"], "hello");

    let stats = service.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.successful_requests, 2);
    assert_eq!(stats.failed_requests, 0);
    assert!(stats.min_response_time <= stats.p95_response_time);
    assert!(stats.p95_response_time <= stats.p99_response_time);
    assert!(stats.p99_response_time <= stats.max_response_time);

    let metrics = service.metrics();
    assert!((metrics.success_rate - 1.0).abs() < 1e-9);
    assert_eq!(metrics.concurrent_connections, 0);

    echo.stop().await.expect("stop echo server");
}

#[tokio::test]
async fn missing_required_argument_fails_and_is_recorded() {
    let echo = spawn_echo_server().await.expect("echo server");
    let service =
        ServiceFactory::create_core_service(echo_config(&echo.base_url)).expect("core service");
    service.connect_all().await;

    let err = service
        .invoke("createNote", json!({}))
        .await
        .expect_err("missing title");
    assert!(err.to_string().contains("Missing required parameter: title"));

    let stats = service.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.failed_requests, 1);
    let metrics = service.metrics();
    assert!((metrics.success_rate + metrics.error_rate - 1.0).abs() < 1e-9);

    echo.stop().await.expect("stop echo server");
}

#[tokio::test]
async fn invoke_against_failed_server_surfaces_connection_error() {
    let unused = toolbridge_test_support::pick_unused_port().expect("port");
    let config: CoreConfig = serde_json::from_value(json!({
        "servers": {
            "down": {
                "baseUrl": format!("http://127.0.0.1:{unused}"),
                "connection": {
                    "timeoutMs": 500,
                    "maxRetries": 1,
                    "retryIntervalMs": 10
                },
                "tools": {
                    "ping": {"method": "GET", "path": "/ping"}
                }
            }
        }
    }))
    .expect("valid config");

    let service = ServiceFactory::create_core_service(config).expect("core service");
    let err = service
        .connections()
        .connect("down")
        .await
        .expect_err("nothing listening");
    assert!(err.to_string().contains("down"));
    assert_eq!(
        service.connections().state("down").expect("state"),
        ConnState::Failed
    );

    let err = service.invoke("ping", json!({})).await.expect_err("failed server");
    assert!(err.to_string().contains("failed state"));
}
