//! The runtime picks up the turn log path from the environment.
//!
//! Kept in its own test binary: the variable is process-wide and the other
//! integration tests expect logging to stay off.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use turnstile_agent::{
    AgentConfig, AgentError, AgentRuntime, Message, ModelClient, ModelResponse, Result,
    ToolRegistry,
};
use turnstile_store::TURN_LOG_ENV;

struct DoneModel;

#[async_trait]
impl ModelClient for DoneModel {
    async fn send(&self, messages: &[Message]) -> Result<ModelResponse> {
        if messages.is_empty() {
            return Err(AgentError::Internal("empty request".into()));
        }
        Ok(ModelResponse::text("All set. [[TASK_COMPLETE]]"))
    }
}

#[tokio::test]
async fn runtime_writes_turn_log_named_by_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("turns.jsonl");
    // SAFETY: this binary holds a single test, so nothing reads the
    // environment concurrently.
    unsafe { std::env::set_var(TURN_LOG_ENV, &path) };

    let runtime = AgentRuntime::new(
        AgentConfig::default(),
        Arc::new(DoneModel),
        Arc::new(ToolRegistry::new()),
    );
    let mut session = runtime.new_session();
    let response = runtime
        .run_task(&mut session, "Say hi", &CancellationToken::new())
        .await
        .unwrap();
    assert!(response.completed);

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["user_input"], "Say hi");
    assert_eq!(record["completion_reached"], true);
}
