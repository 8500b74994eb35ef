// Common types used across the generator

use serde::{Deserialize, Serialize};

/// The four history channels kept per series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    X, // generated values
    E, // noise/residual terms
    D, // differenced terms (integrated models only)
    S, // externally sourced raw samples
}

/// Outbound streaming message, one per generated value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_source: Option<String>,
    pub group: String,
    pub rank: i32,
    pub title: String,
    pub timestamp: String,
    pub value: f64,
}

// Generation constants
pub const MAX_BUFFER_SIZE: usize = 500;
pub const ID_TIME_ELAPSED: &str = "t";
pub const ID_EVENT_COUNT: &str = "c";
pub const ID_EVENT_ITERATOR: &str = "i";
pub const TIMELAG_SEPARATOR: char = '_';
pub const SOURCE_FILE_SEPARATOR: char = ';';
