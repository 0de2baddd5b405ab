//! `vinc_core` is the engine behind `vinc`, a tool that keeps regions of text
//! files in sync with the content of other files.
//!
//! A document asks for another file's content with a directive written in its
//! own comment syntax:
//!
//! ```text
//! # virtualInclude "shared/header.txt"
//! ```
//!
//! A pass expands the directive into a region delimited by generated marker
//! lines and keeps that region identical to the included file:
//!
//! ```text
//! # virtualInclude "shared/header.txt"
//! # virtualIncludeStart - DO NOT EDIT CONTENT BELOW
//! ...content of shared/header.txt...
//! # virtualIncludeEnd - DO NOT EDIT CONTENT ABOVE
//! ```
//!
//! ## Processing Pipeline
//!
//! ```text
//! Document
//!   → Rule resolver (comment syntax for each line: inline override, section, language)
//!   → Directive scanner (directives, rejected self includes, missing files)
//!   → Content reader (reads includes, neutralizes nested directives)
//!   → Region inspector (insert, up to date, replace, repair)
//!   → Edit script (one batch of line edits against the scanned snapshot)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from `vinc.toml`.
//! - [`rules`]: Comment styles, directive patterns and marker templates.
//! - [`guard`]: Path normalization and the self include check.
//! - [`project`]: Walking a project and the file system document store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use vinc_core::FsStore;
//! use vinc_core::VincConfig;
//! use vinc_core::Workspace;
//!
//! let config = VincConfig::default();
//! let mut workspace = Workspace::from_config(&config).unwrap();
//! let mut store = FsStore::new(config.max_file_size);
//! let outcome = workspace.process(&mut store, Path::new("notes.md"));
//! println!("{} issue(s)", outcome.issue_count());
//! ```

pub use config::*;
pub use directive::*;
pub use edit::*;
pub use engine::*;
pub use error::*;
pub use mapping::*;
pub use neutralize::*;
pub use project::*;
pub use region::*;
pub use workspace::*;

pub mod config;
mod directive;
mod edit;
mod engine;
#[allow(unused_assignments)]
mod error;
pub mod guard;
pub mod languages;
mod mapping;
mod neutralize;
pub mod project;
mod region;
pub mod rules;
mod workspace;
