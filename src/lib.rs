// Data Stream Generator Library
//
// A configurable multivariate time series synthesizer: stochastic and
// expression-based series models with cross-series driver coupling,
// streamed to a broker or written as delimited batch files

pub mod clients;
pub mod config;
pub mod core;
pub mod error; // Unified error handling
pub mod export;
pub mod progress;
pub mod runner;
pub mod types;
pub mod validation; // Pre-flight validation

// Re-export core engine types
pub use self::core::{
    HistoryStore, ModelEvaluator, OutlierInjector, SeriesGenerator, SharedHistory,
};

// Re-export error types
pub use error::{GeneratorError, GeneratorResult};

// Re-export configuration
pub use config::{ConfigError, GeneratorConfig, RunConfig, RunMode, SeriesConfig};

// Re-export orchestration
pub use runner::{Orchestrator, RunSummary};

// Re-export client types
pub use clients::{MemorySink, PublishSink, WsSink};

// Re-export common types
pub use types::{Channel, Message, MAX_BUFFER_SIZE};
