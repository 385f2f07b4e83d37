//! Reservoir Core
//!
//! This crate provides the runtime for Reservoir, a directive-driven
//! hydration layer over server-rendered markup. It implements:
//!
//! - A markup tree with a per-node side table for runtime bookkeeping
//! - A sandboxed expression language compiled to closures
//! - A reactive key-value store with durable persistence
//! - The hydration walker, reactive components and hydration hooks
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `dom`: Arena markup tree, HTML parser and serializer, side table
//! - `expr`: Expression IR, parser, compiler and dynamic values
//! - `reactive`: Store, storage backends, scopes, hydration queue, `Runtime`
//! - `hydrate`: Directive walker, component registry, hook registry
//! - `logs`: Error and performance logs
//! - `config`: Runtime configuration and reserved attribute names
//!
//! # Example
//!
//! ```rust
//! use reservoir_core::Runtime;
//!
//! let rt = Runtime::from_html(r#"<p $="`Hello, ${name}!`"></p>"#);
//! rt.set("name", "Ada", false);
//! assert_eq!(rt.html(), r#"<p $="`Hello, ${name}!`" dry="">Hello, Ada!</p>"#);
//! ```

pub mod config;
pub mod dom;
pub mod error;
pub mod expr;
pub mod hydrate;
pub mod logs;
pub mod reactive;

pub use config::Config;
pub use dom::{Document, NodeId};
pub use error::{Error, Result};
pub use expr::{EvalError, Value};
pub use hydrate::{HookPhase, Props, Refresh};
pub use logs::{ErrorLog, EvaluationStats, PerfLog};
pub use reactive::{AssetPreloader, EvalOptions, FileStorage, MemoryStorage, Runtime, Storage};
