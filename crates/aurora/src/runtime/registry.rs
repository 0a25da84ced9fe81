use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as RoundLock;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::tools::CapabilityRegistry;
use crate::trace::TraceSink;

use super::conversation::ConversationRuntime;
use super::depth::DepthGuard;
use super::scheduler::Scheduler;

/// Shared handle to a conversation. Holding the lock is holding the right to run a round.
pub type ConversationHandle = Arc<RoundLock<ConversationRuntime>>;

/// Live conversations keyed by id.
///
/// All conversations share one capability registry, one tracer and one
/// concurrency limit; each has its own depth guard.
pub struct ConversationRegistry {
    scheduler: Scheduler,
    config: EngineConfig,
    conversations: Mutex<HashMap<Uuid, ConversationHandle>>,
}

impl ConversationRegistry {
    pub fn new(capabilities: Arc<CapabilityRegistry>, config: EngineConfig) -> Self {
        Self {
            scheduler: Scheduler::from_config(capabilities, &config),
            config,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_trace(
        capabilities: Arc<CapabilityRegistry>,
        config: EngineConfig,
        trace: TraceSink,
    ) -> Self {
        let scheduler = Scheduler::new(capabilities, trace)
            .with_batch_timeout(config.batch_timeout())
            .with_max_concurrent_tools(config.max_concurrent_tools);
        Self {
            scheduler,
            config,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a conversation at depth zero.
    pub fn open(&self) -> (Uuid, ConversationHandle) {
        let depth = DepthGuard::from_config(&self.config, self.scheduler.trace().clone());
        let runtime = ConversationRuntime::new(self.scheduler.clone(), depth);
        let id = runtime.id();
        let handle = Arc::new(RoundLock::new(runtime));
        self.conversations.lock().insert(id, handle.clone());
        tracing::debug!("opened conversation {}", id);
        (id, handle)
    }

    pub fn get(&self, id: &Uuid) -> Option<ConversationHandle> {
        self.conversations.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<ConversationHandle> {
        let removed = self.conversations.lock().remove(id);
        if removed.is_some() {
            tracing::debug!("closed conversation {}", id);
        }
        removed
    }

    /// Reset a conversation's depth guard. Waits for a running round to finish.
    pub async fn restart(&self, id: &Uuid) -> bool {
        let Some(handle) = self.get(id) else {
            return false;
        };
        handle.lock().await.restart();
        true
    }

    pub fn ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.conversations.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.conversations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.lock().is_empty()
    }
}

impl std::fmt::Debug for ConversationRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConversationRegistry")
            .field("conversations", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
