// src/error.rs
use thiserror::Error;

use crate::tick::Tickset;

/// Errors surfaced at the scheduling engine's boundaries. Condition
/// failures are control flow, not errors; everything tick-path is
/// infallible by construction.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("unknown tickset {0:?} (token from another driver?)")]
    UnknownTickset(Tickset),
}
