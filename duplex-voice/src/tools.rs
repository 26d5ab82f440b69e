//! Tool registration and the tool-call broker.
//!
//! The broker runs each requested call on its own task so that inbound audio
//! and transcripts keep flowing while a handler is busy. Every call that is not
//! cancelled by the agent gets exactly one response: the handler's value, or
//! an `{"error": ...}` payload when the handler fails or the tool is unknown.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use crate::config::ToolDeclaration;
use crate::error::Result;
use crate::events::{ClientMessage, ToolCall, ToolResponse};
use crate::transport::BoxedLink;

/// Handler for tool/function calls from the remote agent.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute a tool call and return the result.
    async fn execute(&self, call: &ToolCall) -> Result<Value>;
}

/// A simple function-based tool handler.
pub struct FnToolHandler<F>
where
    F: Fn(&ToolCall) -> Result<Value> + Send + Sync,
{
    handler: F,
}

impl<F> FnToolHandler<F>
where
    F: Fn(&ToolCall) -> Result<Value> + Send + Sync,
{
    /// Create a new function-based tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&ToolCall) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        (self.handler)(call)
    }
}

/// Async function-based tool handler.
pub struct AsyncToolHandler<F> {
    handler: F,
}

impl<F> AsyncToolHandler<F> {
    /// Create a new async tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for AsyncToolHandler<F>
where
    F: Fn(ToolCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, call: &ToolCall) -> Result<Value> {
        (self.handler)(call.clone()).await
    }
}

/// Tools available to the agent, by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDeclaration, Arc<dyn ToolHandler>)>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with its handler, replacing any tool of the same name.
    pub fn register(&mut self, declaration: ToolDeclaration, handler: Arc<dyn ToolHandler>) {
        let name = declaration.name.clone();
        self.tools.insert(name, (declaration, handler));
    }

    /// Look up the handler for `name`.
    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|(_, h)| h.clone())
    }

    /// Declarations of all registered tools, sorted by name.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self.tools.values().map(|(d, _)| d.clone()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

/// Runs tool calls for one connection and sends their responses.
pub struct ToolBroker {
    registry: Arc<ToolRegistry>,
    link: BoxedLink,
    permits: Arc<Semaphore>,
    inflight: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl ToolBroker {
    /// Create a broker answering on `link`, running at most `max_concurrent` handlers.
    pub fn new(registry: Arc<ToolRegistry>, link: BoxedLink, max_concurrent: usize) -> Self {
        Self {
            registry,
            link,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start every call in `calls`. Returns immediately.
    pub fn dispatch(&self, calls: Vec<ToolCall>) {
        for call in calls {
            self.spawn_call(call);
        }
    }

    fn spawn_call(&self, call: ToolCall) {
        let registry = self.registry.clone();
        let link = self.link.clone();
        let permits = self.permits.clone();
        let inflight = self.inflight.clone();
        let call_id = call.call_id.clone();

        // Held across spawn so the task cannot deregister before it is registered.
        let mut guard = self.inflight.lock();
        if guard.contains_key(&call_id) {
            tracing::warn!(call_id = %call_id, "Duplicate tool call id ignored");
            return;
        }

        let task = tokio::spawn(async move {
            let response = match permits.acquire_owned().await {
                Ok(_permit) => run_call(&registry, &call).await,
                Err(_) => ToolResponse::error(&call, "tool broker shut down"),
            };

            if response.is_error() {
                tracing::warn!(call_id = %call.call_id, tool = %call.name, "Tool call failed");
            } else {
                tracing::debug!(call_id = %call.call_id, tool = %call.name, "Tool call finished");
            }

            if !link.send(ClientMessage::ToolResponse(response)) {
                tracing::debug!(call_id = %call.call_id, "Link closed before tool response");
            }
            inflight.lock().remove(&call.call_id);
        });

        guard.insert(call_id, task.abort_handle());
    }

    /// Abort calls the agent withdrew. No response is sent for them.
    pub fn cancel(&self, call_ids: &[String]) -> usize {
        let mut inflight = self.inflight.lock();
        let mut cancelled = 0;
        for id in call_ids {
            if let Some(handle) = inflight.remove(id) {
                handle.abort();
                cancelled += 1;
                tracing::info!(call_id = %id, "Tool call cancelled");
            }
        }
        cancelled
    }

    /// Abort every outstanding call.
    pub fn abort_all(&self) -> usize {
        self.permits.close();
        let drained: Vec<AbortHandle> = self.inflight.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    /// Number of calls still running.
    pub fn pending(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl std::fmt::Debug for ToolBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBroker")
            .field("registry", &self.registry)
            .field("pending", &self.pending())
            .finish()
    }
}

async fn run_call(registry: &ToolRegistry, call: &ToolCall) -> ToolResponse {
    let Some(handler) = registry.handler(&call.name) else {
        return ToolResponse::error(call, format!("Unknown tool: {}", call.name));
    };

    match AssertUnwindSafe(handler.execute(call)).catch_unwind().await {
        Ok(Ok(value)) => ToolResponse::for_call(call, value),
        Ok(Err(e)) => ToolResponse::error(call, e.to_string()),
        Err(_) => ToolResponse::error(call, format!("Tool {} panicked", call.name)),
    }
}
