//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every subsystem failure the engine can hit after
//! startup, so the run loop can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: multiverse_core::config::ConfigError,
    },

    /// The event store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: multiverse_events::StoreError,
    },

    /// An orchestrator operation failed.
    #[error("orchestrator error: {source}")]
    Orchestrator {
        /// The underlying orchestrator error.
        #[from]
        source: multiverse_core::orchestrator::OrchestratorError,
    },

    /// A realm driver failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: multiverse_core::tick::TickError,
    },

    /// The orchestration loop failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: multiverse_core::runner::RunnerError,
    },

    /// A spawned task panicked or was cancelled.
    #[error("task {task} did not complete: {source}")]
    Join {
        /// Name of the task.
        task: String,
        /// The underlying join error.
        source: tokio::task::JoinError,
    },
}
