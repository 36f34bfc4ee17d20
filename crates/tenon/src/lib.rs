//! Tenon - incremental document build engine for a language workbench.
//!
//! Given the source files of a language described by a
//! [`tenon_syntax::Grammar`], this crate keeps their syntax trees,
//! cross-references, symbol index and diagnostics up to date as files
//! change:
//!
//! - [`document`]: documents, their build state and the document registry
//! - [`dispatch`]: synchronous and worker-pool parsing
//! - [`index`]: exported symbols and outgoing references per document
//! - [`builder`]: the phase-by-phase incremental build
//! - [`lock`]: serialization of builds against each other and against queries
//! - [`workspace`]: folder loading and the lock-guarded workspace facade
//!
//! Scoping, linking and validation are pluggable through the traits in
//! [`scope`], [`linker`], [`references`] and [`validation`]; [`services`]
//! bundles one language's collaborators. [`domainmodel`] is a small sample
//! language.

#![forbid(unsafe_code)]

pub mod builder;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod domainmodel;
pub mod error;
pub mod fs;
pub mod index;
pub mod linker;
pub mod lock;
pub mod references;
pub mod scope;
pub mod services;
pub mod validation;
pub mod workspace;

pub use builder::{BuildOptions, DocumentBuilder, ListenerHandle};
pub use config::WorkbenchConfig;
pub use dispatch::{ParserDispatcher, SyncParser, WorkerPool, WorkerPoolConfig};
pub use document::{Document, DocumentHandle, DocumentState, DocumentUri, Documents};
pub use error::{Error, Result};
pub use index::{IndexManager, ReferenceDescription, SymbolDescription};
pub use lock::WorkspaceLock;
pub use services::LanguageServices;
pub use validation::{Diagnostic, Severity, ValidationCategory, ValidationOptions};
pub use workspace::{LoadReport, Workspace, WorkspaceManager};
