use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Workspace name stamped on every event context.
    pub workspace: String,
    pub query_cache_capacity: usize,
    /// Maximum number of undo entries kept; the oldest is dropped first.
    pub undo_depth: usize,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: "default".into(),
            query_cache_capacity: 256,
            undo_depth: 100,
            event_channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineConfigError {
    #[error("a handler is already registered for command type {0}")]
    DuplicateHandler(String),
    #[error("query cache capacity must be greater than zero")]
    ZeroQueryCacheCapacity,
    #[error("event channel capacity must be greater than zero")]
    ZeroEventChannelCapacity,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.query_cache_capacity == 0 {
            return Err(EngineConfigError::ZeroQueryCacheCapacity);
        }
        if self.event_channel_capacity == 0 {
            return Err(EngineConfigError::ZeroEventChannelCapacity);
        }
        Ok(())
    }
}
