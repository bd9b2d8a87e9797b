#![forbid(unsafe_code)]

//! Support code for the `arbor` command-line tool.
//!
//! The binary only parses arguments and prints; opening files, turning text
//! into tuples and running each command lives here so it can be tested
//! without spawning a process.

/// Command implementations returning serializable reports.
pub mod commands;
/// The optional TOML configuration file.
pub mod config;
/// Text to [`Value`](crate::storage::tuple::Value) conversion and back.
pub mod values;

use std::path::PathBuf;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use crate::storage::tuple::ColumnType;
use crate::types::ArborError;

pub use commands::{Row, Session};
pub use config::{CliConfig, ConfigError};

/// How command results are printed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Failure inside the storage engine.
    #[error(transparent)]
    Arbor(#[from] ArborError),
    /// The configuration file could not be used.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A column list passed to `create` could not be parsed.
    #[error("invalid column definition '{spec}': expected name:type")]
    ColumnSpec {
        /// Offending part of the list.
        spec: String,
    },
    /// A textual value does not parse as its column's type.
    #[error("column '{column}' ({ty}): cannot read '{input}'")]
    BadValue {
        /// Column name.
        column: String,
        /// Column type.
        ty: ColumnType,
        /// Text that failed to parse.
        input: String,
    },
    /// A row or key has the wrong number of values.
    #[error("expected {expected} values, got {found}")]
    Arity {
        /// Values the schema allows.
        expected: usize,
        /// Values supplied.
        found: usize,
    },
    /// `create` was pointed at a file that is already there.
    #[error("{} already exists", path.display())]
    AlreadyExists {
        /// Target path.
        path: PathBuf,
    },
    /// Rendering a report as JSON failed.
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}
