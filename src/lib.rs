//! # maskstream - CDC-driven masking and transformation router
//!
//! Consumes a stream of row-level change events, classifies each column
//! against a library of data-sensitivity rules, compiles a transformation
//! script on the fly, and pipes the (possibly masked) row data into an
//! external row-processing engine - one engine subprocess per distinct
//! shape of change (operation x source table x column list).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ CDC source│──▶│ Event Router │──▶│ Job Registry │──▶│ Engine proc │
//! │ (JSON)    │   │ (temporal    │   │ (lookup or   │   │ (stdin pipe,│
//! │           │   │  normalize)  │   │  create job) │   │  per shape) │
//! └───────────┘   └──────────────┘   └──────┬───────┘   └─────────────┘
//!                                           │ on create
//!                                           ▼
//!                          ┌─────────────────────────────────┐
//!                          │ ClassLibrary ─▶ ScriptCompiler  │
//!                          │ (rule match)    (engine DSL)    │
//!                          └─────────────────────────────────┘
//! ```
//!
//! ## Failure model
//!
//! The router is fail-stop: any pipe write/flush failure or unexpected
//! error while handling an event tears down every job and terminates the
//! whole process with a non-zero status. The CDC source resumes from its
//! last durable checkpoint on restart, so nothing is silently dropped
//! (at-least-once delivery after restart).

pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod matcher;
pub mod router;
pub mod rules;
pub mod schema_log;
pub mod script;
pub mod source;
pub mod supervisor;
pub mod temporal;

pub use classify::{ClassEntry, ClassLibrary};
pub use config::{Config, EngineConfig, TargetSpec};
pub use error::{Result, RouterError};
pub use event::{ChangeEvent, ColumnSchema, Op};
pub use job::{Field, Job, JobSignature};
pub use matcher::Matcher;
pub use router::Router;
pub use rules::{Rule, RuleKind, RuleLibrary, FIELD_NAME_TOKEN};
pub use source::{ChangeSource, JsonLinesSource, SourceRecord};
pub use supervisor::{EngineProcess, Supervisor};
