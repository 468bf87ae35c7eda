//! Supervisor behavior against a real (scripted) MCP server subprocess:
//! discovery, invocation, and the transparent reconnect after a crash.

use jig_core::config::{McpServerConfig, McpTransport};
use jig_core::events::{Event, McpEvent, Topic};
use jig_core::mcp::{McpState, McpSupervisor};
use jig_core::resolver::ShellResolver;
use jig_core::tool::ToolRegistry;
use jig_core::{Broker, RunContext};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn server_config(name: &str, die_after_calls: Option<usize>) -> McpServerConfig {
    let mut env = HashMap::new();
    if let Some(limit) = die_after_calls {
        env.insert("MOCK_DIE_AFTER_CALLS".to_string(), limit.to_string());
    }
    let mut config = McpServerConfig::new(
        name,
        McpTransport::Stdio {
            command: env!("CARGO_BIN_EXE_mock_mcp_server").to_string(),
            args: vec![],
            env,
        },
    );
    config.timeout_secs = 10;
    config
}

fn make_supervisor() -> (Arc<McpSupervisor>, Arc<Broker>, Arc<ToolRegistry>) {
    let broker = Arc::new(Broker::new());
    let registry = Arc::new(ToolRegistry::new());
    let supervisor = Arc::new(McpSupervisor::new(
        broker.clone(),
        Arc::new(ShellResolver::new()),
        &registry,
    ));
    (supervisor, broker, registry)
}

#[tokio::test]
async fn test_startup_discovers_and_registers_tools() {
    let (supervisor, _broker, registry) = make_supervisor();
    supervisor.start_all(&[server_config("mock", None)]).await;

    let states = supervisor.states();
    assert_eq!(states["mock"].state, McpState::Connected);
    assert_eq!(states["mock"].tool_count, 1);

    // The discovered tool is published under its namespaced name.
    let tool = registry.get("mcp_mock_echo").expect("echo tool registered");
    let info = tool.info();
    assert_eq!(info.required, vec!["message"]);

    supervisor.close_all().await.unwrap();
}

#[tokio::test]
async fn test_call_tool_round_trip() {
    let (supervisor, _broker, _registry) = make_supervisor();
    supervisor.start_all(&[server_config("mock", None)]).await;

    let (content, is_error) = supervisor
        .call_tool("mock", "echo", json!({"message": "hello"}))
        .await
        .unwrap();
    assert_eq!(content, "echo: hello");
    assert!(!is_error);

    supervisor.close_all().await.unwrap();
}

#[tokio::test]
async fn test_disabled_tools_filtered_at_discovery() {
    let mut config = server_config("mock", None);
    config.disabled_tools = vec!["echo".to_string()];

    let (supervisor, _broker, registry) = make_supervisor();
    supervisor.start_all(&[config]).await;

    assert_eq!(supervisor.states()["mock"].tool_count, 0);
    assert!(registry.get("mcp_mock_echo").is_none());

    supervisor.close_all().await.unwrap();
}

#[tokio::test]
async fn test_crashed_server_reconnects_transparently() {
    // The server exits after serving one call; the next call must ride the
    // probe → error → reconnect path and still succeed.
    let (supervisor, broker, _registry) = make_supervisor();
    let ctx = RunContext::new("s", "/tmp");
    let mut sub = broker.subscribe(Topic::Mcp, &ctx);

    supervisor.start_all(&[server_config("mock", Some(1))]).await;

    let (first, _) = supervisor
        .call_tool("mock", "echo", json!({"message": "one"}))
        .await
        .unwrap();
    assert_eq!(first, "echo: one");

    // Give the doomed server a moment to die.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let (second, is_error) = supervisor
        .call_tool("mock", "echo", json!({"message": "two"}))
        .await
        .unwrap();
    assert_eq!(second, "echo: two");
    assert!(!is_error);
    assert_eq!(supervisor.states()["mock"].state, McpState::Connected);

    // The state stream contains connected, error, connected as an ordered
    // subsequence.
    let mut sequence = Vec::new();
    while let Some(event) = sub.try_next() {
        if let Event::Mcp(McpEvent::StateChanged { state, .. }) = event {
            sequence.push(state);
        }
    }
    let mut remaining = sequence.iter();
    for want in [McpState::Connected, McpState::Error, McpState::Connected] {
        assert!(
            remaining.any(|s| *s == want),
            "expected connected, error, connected in order; got {:?}",
            sequence
        );
    }

    supervisor.close_all().await.unwrap();
}
