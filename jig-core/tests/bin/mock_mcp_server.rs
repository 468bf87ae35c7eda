//! A scripted MCP server for supervisor tests.
//!
//! Speaks newline-delimited JSON-RPC 2.0 over stdio, exposing one `echo`
//! tool. When `MOCK_DIE_AFTER_CALLS` is set, the process exits after that
//! many `tools/call` responses, simulating a crashed server so tests can
//! exercise the supervisor's reconnect path.

use serde_json::{json, Value};
use std::io::{BufRead, Write};

fn main() {
    let die_after: Option<usize> = std::env::var("MOCK_DIE_AFTER_CALLS")
        .ok()
        .and_then(|v| v.parse().ok());
    let mut calls_served = 0usize;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) if !line.trim().is_empty() => line,
            Ok(_) => continue,
            Err(_) => break,
        };
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => continue,
        };

        let method = message["method"].as_str().unwrap_or_default().to_string();
        let id = message.get("id").cloned();

        // Notifications carry no id and get no reply.
        let id = match id {
            Some(id) if !id.is_null() => id,
            _ => continue,
        };

        let reply = match method.as_str() {
            "initialize" => {
                // Echo the client's protocol version back.
                let version = message["params"]["protocolVersion"]
                    .as_str()
                    .unwrap_or("2024-11-05")
                    .to_string();
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": version,
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock-mcp", "version": "0.1"}
                    }
                })
            }
            "ping" => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "tools": [{
                        "name": "echo",
                        "description": "Echo the message back",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"message": {"type": "string"}},
                            "required": ["message"]
                        }
                    }]
                }
            }),
            "tools/call" => {
                let message_arg = message["params"]["arguments"]["message"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                calls_served += 1;
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{"type": "text", "text": format!("echo: {}", message_arg)}],
                        "isError": false
                    }
                })
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("method not found: {}", method)}
            }),
        };

        let _ = writeln!(out, "{}", reply);
        let _ = out.flush();

        if method == "tools/call" {
            if let Some(limit) = die_after {
                if calls_served >= limit {
                    std::process::exit(1);
                }
            }
        }
    }
}
