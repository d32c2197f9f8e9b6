//! Scriptable in-process provider for tests.
//!
//! Connect parameters:
//! - `host`: label for the connection (and default session name)
//! - `fail`: `true` makes every connect fail
//! - `connect_delay_ms`: delay before connect completes
//!
//! `exec` arguments:
//! - `command`: `"fail"` returns an exec error, `"drop"` reports the connection
//!   lost, anything else echoes back
//! - `delay_ms`: simulated backend latency
//!
//! The provider records every call and the highest number of calls it saw in
//! flight at once, both per connection label and overall.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use backplane_mcp_protocol::{
    ConfigSchema, JsonSchema, OptionSpec, ProviderSettings, ProviderType, ToolSchema,
};

use crate::adapter::{Connection, ConnectionParams, OperationSpec, Provider, ProviderError};

#[derive(Default)]
struct MockState {
    connect_attempts: AtomicUsize,
    fail_connects: AtomicUsize,
    disconnects: AtomicUsize,
    unhealthy: AtomicBool,
    active_total: AtomicUsize,
    max_active_total: AtomicUsize,
    active_by_label: Mutex<HashMap<String, usize>>,
    max_active_by_label: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockState {
    fn enter(&self, label: &str) {
        let total = self.active_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_total.fetch_max(total, Ordering::SeqCst);

        let mut active = self.active_by_label.lock();
        let count = active.entry(label.to_string()).or_insert(0);
        *count += 1;
        let mut max = self.max_active_by_label.lock();
        let seen = max.entry(label.to_string()).or_insert(0);
        *seen = (*seen).max(*count);
    }

    fn leave(&self, label: &str) {
        self.active_total.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.active_by_label.lock().get_mut(label) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Leaves the in-flight counters even when the call future is dropped mid-flight.
struct InFlight<'a> {
    state: &'a MockState,
    label: &'a str,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a MockState, label: &'a str) -> Self {
        state.enter(label);
        Self { state, label }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.leave(self.label);
    }
}

#[derive(Clone)]
pub struct MockProvider {
    provider_type: ProviderType,
    state: Arc<MockState>,
}

impl MockProvider {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            state: Arc::new(MockState::default()),
        }
    }

    /// Fail the next `n` connect attempts, then succeed.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls seen on one connection label.
    pub fn max_concurrency_for(&self, label: &str) -> usize {
        self.state
            .max_active_by_label
            .lock()
            .get(label)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of concurrent calls seen across all connections.
    pub fn max_concurrency(&self) -> usize {
        self.state.max_active_total.load(Ordering::SeqCst)
    }

    /// `(label, command)` of every execute call, in the order they reached the backend.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.calls.lock().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }

    fn describe_config(&self) -> ConfigSchema {
        ConfigSchema::common().with_option(OptionSpec::boolean(
            "disable_delete",
            "Reject destructive commands",
            false,
        ))
    }

    fn connect_schema(&self) -> ToolSchema {
        ToolSchema::object()
            .with_property("host", JsonSchema::string().with_description("Connection label"))
            .with_property("fail", JsonSchema::boolean())
            .with_property("connect_delay_ms", JsonSchema::integer().with_range(0, 600_000))
    }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::new("exec", "Run a scripted command")
                .required_param("command", JsonSchema::string())
                .param("delay_ms", JsonSchema::integer().with_range(0, 600_000))
                .mutating(),
            OperationSpec::new("status", "Report the connection label"),
        ]
    }

    fn default_session_name(&self, params: &ConnectionParams) -> Option<String> {
        params.str("host").map(str::to_string)
    }

    async fn connect(
        &self,
        params: &ConnectionParams,
        _settings: &ProviderSettings,
    ) -> Result<Box<dyn Connection>, ProviderError> {
        let attempt = self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = params.integer("connect_delay_ms") {
            tokio::time::sleep(Duration::from_millis(ms.max(0) as u64)).await;
        }
        if params.get("fail").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ProviderError::Connect("mock backend refused connection".into()));
        }
        let pending = self.state.fail_connects.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.fail_connects.store(pending - 1, Ordering::SeqCst);
            return Err(ProviderError::Connect(format!(
                "mock connect attempt {} failed",
                attempt + 1
            )));
        }
        Ok(Box::new(MockConnection {
            label: params.str_or("host", &format!("mock-{}", attempt + 1)),
            state: Arc::clone(&self.state),
            calls: 0,
            closed: false,
        }))
    }
}

struct MockConnection {
    label: String,
    state: Arc<MockState>,
    calls: u64,
    closed: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(
        &mut self,
        command: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ProviderError> {
        let _in_flight = InFlight::enter(&self.state, &self.label);
        self.state
            .calls
            .lock()
            .push((self.label.clone(), command.to_string()));
        self.calls += 1;

        if let Some(ms) = args.get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        match command {
            "status" => Ok(json!({"label": self.label, "calls": self.calls})),
            "exec" => match args.get("command").and_then(Value::as_str) {
                Some("fail") => Err(ProviderError::Exec("mock command failed".into())),
                Some("drop") => Err(ProviderError::ConnectionLost("mock socket closed".into())),
                Some(other) => Ok(json!({
                    "label": self.label,
                    "command": other,
                    "call": self.calls,
                })),
                None => Err(ProviderError::invalid_argument("command", "required")),
            },
            other => Err(ProviderError::UnsupportedCommand(other.to_string())),
        }
    }

    async fn is_healthy(&mut self) -> bool {
        !self.closed && !self.state.unhealthy.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) -> Result<(), ProviderError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
