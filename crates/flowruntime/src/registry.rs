use flowcore::{LogicResult, NodeContext, NodeInput, NodeLogic};
use std::collections::BTreeMap;
use std::future::Future;

/// Maps a stable string key to node logic. Lookups must be pure and
/// idempotent; callers resolve once and keep the result.
pub trait LogicResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<NodeLogic>;
}

/// Metadata about a registered logic key
#[derive(Debug, Clone, Default)]
pub struct LogicMetadata {
    pub description: String,
    pub category: String,
}

struct Entry {
    logic: NodeLogic,
    metadata: LogicMetadata,
}

/// Static registration table of node logic.
#[derive(Default)]
pub struct LogicRegistry {
    entries: BTreeMap<String, Entry>,
}

impl LogicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `logic` under `key`, replacing any previous entry.
    pub fn register(&mut self, key: impl Into<String>, logic: NodeLogic, metadata: LogicMetadata) {
        let key = key.into();
        tracing::debug!(key = %key, is_async = logic.is_async(), "registering node logic");
        self.entries.insert(key, Entry { logic, metadata });
    }

    pub fn register_sync<F>(&mut self, key: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(NodeInput, &NodeContext) -> LogicResult + Send + Sync + 'static,
    {
        self.register(key, NodeLogic::from_sync(f), LogicMetadata::default());
        self
    }

    pub fn register_async<F, Fut>(&mut self, key: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(NodeInput, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LogicResult> + Send + 'static,
    {
        self.register(key, NodeLogic::from_async(f), LogicMetadata::default());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn metadata(&self, key: &str) -> Option<&LogicMetadata> {
        self.entries.get(key).map(|e| &e.metadata)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LogicResolver for LogicRegistry {
    fn resolve(&self, key: &str) -> Option<NodeLogic> {
        self.entries.get(key).map(|e| e.logic.clone())
    }
}
