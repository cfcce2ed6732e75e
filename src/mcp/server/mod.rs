//! Serving side of the bridge.
//!
//! Capabilities are registered explicitly: each [`ToolSpec`], [`ResourceSpec`]
//! or [`PromptSpec`] is paired with an async handler, either through
//! [`McpServerBuilder`] at startup or through the `add_*`/`remove_*` methods
//! at runtime. After a runtime change, [`McpServer::notify_list_changed`]
//! tells connected clients to refresh.

use crate::mcp::capability::{CapabilityDescriptor, CapabilityKind};
use crate::mcp::content::{InvocationResult, PromptMessage};
use crate::mcp::events::ChangeDetail;
use crate::mcp::value::Arguments;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

mod dispatch;
mod serve;
mod specs;

pub use specs::{PromptSpec, ResourceBody, ResourceSpec, ToolSpec};

const DEFAULT_PAGE_SIZE: usize = 50;

/// What a tool handler returns. Business failures set `is_error`.
pub type ToolOutput = InvocationResult;

pub type ToolHandler = Arc<dyn Fn(Arguments) -> BoxFuture<'static, ToolOutput> + Send + Sync>;
pub type ResourceHandler =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ResourceBody, String>> + Send + Sync>;
pub type PromptHandler = Arc<
    dyn Fn(Arguments) -> BoxFuture<'static, Result<Vec<PromptMessage>, String>> + Send + Sync,
>;

struct Registered<H> {
    descriptor: CapabilityDescriptor,
    handler: H,
}

fn upsert<H>(entries: &mut Vec<Registered<H>>, entry: Registered<H>) {
    match entries
        .iter_mut()
        .find(|existing| existing.descriptor.key() == entry.descriptor.key())
    {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

fn remove<H>(entries: &mut Vec<Registered<H>>, key: &str) -> bool {
    let before = entries.len();
    entries.retain(|entry| entry.descriptor.key() != key);
    entries.len() != before
}

#[derive(Default)]
struct Registry {
    tools: Vec<Registered<ToolHandler>>,
    resources: Vec<Registered<ResourceHandler>>,
    prompts: Vec<Registered<PromptHandler>>,
}

impl Registry {
    fn descriptors(&self, kind: CapabilityKind) -> Vec<CapabilityDescriptor> {
        match kind {
            CapabilityKind::Tool => self.tools.iter().map(|e| e.descriptor.clone()).collect(),
            CapabilityKind::Resource => self
                .resources
                .iter()
                .map(|e| e.descriptor.clone())
                .collect(),
            CapabilityKind::Prompt => self.prompts.iter().map(|e| e.descriptor.clone()).collect(),
        }
    }
}

struct ServerInner {
    name: String,
    version: String,
    instructions: Option<String>,
    page_size: usize,
    registry: RwLock<Registry>,
    sessions: Mutex<Vec<mpsc::UnboundedSender<Value>>>,
}

/// Cheap to clone; clones share registrations and sessions.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

pub struct McpServerBuilder {
    name: String,
    version: String,
    instructions: Option<String>,
    page_size: usize,
    registry: Registry,
}

fn tool_handler<F, Fut>(handler: F) -> ToolHandler
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolOutput> + Send + 'static,
{
    Arc::new(move |arguments| handler(arguments).boxed())
}

fn resource_handler<F, Fut>(handler: F) -> ResourceHandler
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResourceBody, String>> + Send + 'static,
{
    Arc::new(move || handler().boxed())
}

fn prompt_handler<F, Fut>(handler: F) -> PromptHandler
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<PromptMessage>, String>> + Send + 'static,
{
    Arc::new(move |arguments| handler(arguments).boxed())
}

impl McpServerBuilder {
    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }

    /// Entries per `*/list` page. Zero is treated as one.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn tool<F, Fut>(mut self, spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutput> + Send + 'static,
    {
        upsert(
            &mut self.registry.tools,
            Registered {
                descriptor: spec.into_descriptor(),
                handler: tool_handler(handler),
            },
        );
        self
    }

    pub fn resource<F, Fut>(mut self, spec: ResourceSpec, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceBody, String>> + Send + 'static,
    {
        upsert(
            &mut self.registry.resources,
            Registered {
                descriptor: spec.into_descriptor(),
                handler: resource_handler(handler),
            },
        );
        self
    }

    pub fn prompt<F, Fut>(mut self, spec: PromptSpec, handler: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<PromptMessage>, String>> + Send + 'static,
    {
        upsert(
            &mut self.registry.prompts,
            Registered {
                descriptor: spec.into_descriptor(),
                handler: prompt_handler(handler),
            },
        );
        self
    }

    pub fn build(self) -> McpServer {
        McpServer {
            inner: Arc::new(ServerInner {
                name: self.name,
                version: self.version,
                instructions: self.instructions,
                page_size: self.page_size,
                registry: RwLock::new(self.registry),
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl McpServer {
    pub fn builder(name: &str) -> McpServerBuilder {
        McpServerBuilder {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            page_size: DEFAULT_PAGE_SIZE,
            registry: Registry::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Currently registered descriptors of one kind, in registration order.
    pub async fn descriptors(&self, kind: CapabilityKind) -> Vec<CapabilityDescriptor> {
        self.inner.registry.read().await.descriptors(kind)
    }

    pub async fn add_tool<F, Fut>(&self, spec: ToolSpec, handler: F)
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolOutput> + Send + 'static,
    {
        let entry = Registered {
            descriptor: spec.into_descriptor(),
            handler: tool_handler(handler),
        };
        upsert(&mut self.inner.registry.write().await.tools, entry);
    }

    pub async fn add_resource<F, Fut>(&self, spec: ResourceSpec, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResourceBody, String>> + Send + 'static,
    {
        let entry = Registered {
            descriptor: spec.into_descriptor(),
            handler: resource_handler(handler),
        };
        upsert(&mut self.inner.registry.write().await.resources, entry);
    }

    pub async fn add_prompt<F, Fut>(&self, spec: PromptSpec, handler: F)
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<PromptMessage>, String>> + Send + 'static,
    {
        let entry = Registered {
            descriptor: spec.into_descriptor(),
            handler: prompt_handler(handler),
        };
        upsert(&mut self.inner.registry.write().await.prompts, entry);
    }

    pub async fn remove_tool(&self, name: &str) -> bool {
        remove(&mut self.inner.registry.write().await.tools, name)
    }

    pub async fn remove_resource(&self, uri: &str) -> bool {
        remove(&mut self.inner.registry.write().await.resources, uri)
    }

    pub async fn remove_prompt(&self, name: &str) -> bool {
        remove(&mut self.inner.registry.write().await.prompts, name)
    }

    /// Opens a push channel for one connected client. Closed channels are
    /// pruned on the next notification.
    pub async fn attach_session(&self) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.lock().await.push(tx);
        rx
    }

    /// Sends `notifications/<kind>/list_changed` to every attached session.
    /// Returns how many sessions received it.
    pub async fn notify_list_changed(
        &self,
        kind: CapabilityKind,
        detail: Option<ChangeDetail>,
    ) -> usize {
        let mut notification = json!({
            "jsonrpc": "2.0",
            "method": kind.list_changed_method(),
        });
        if let (Some(detail), Some(object)) = (detail, notification.as_object_mut()) {
            object.insert("params".to_string(), detail.to_params());
        }

        let mut sessions = self.inner.sessions.lock().await;
        sessions.retain(|session| session.send(notification.clone()).is_ok());
        debug!(
            server = %self.inner.name,
            kind = %kind,
            sessions = sessions.len(),
            "Broadcast MCP list_changed notification"
        );
        sessions.len()
    }
}
