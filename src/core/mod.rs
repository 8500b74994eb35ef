// Core generation engine modules

pub mod drivers;
pub mod expression;
pub mod generator;
pub mod history;
pub mod model;
pub mod noise;
pub mod outlier;

// Re-export commonly used types
pub use generator::SeriesGenerator;
pub use history::{HistoryStore, SharedHistory};
pub use model::{ModelEvaluator, TickContext};
pub use outlier::OutlierInjector;
