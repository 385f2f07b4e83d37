//! Reactive State
//!
//! The store and everything that reacts to it: persistence, scope assembly,
//! the hydration queue and the [`Runtime`] that ties them together.
//!
//! # Concepts
//!
//! ## Store
//!
//! A flat JSON object addressed by dot paths (`user.name`). Every change
//! bumps a generation counter. Keys marked persistent are mirrored into a
//! second object that is written through a [`Storage`] backend.
//!
//! ## Scope
//!
//! What an expression can see: runtime capabilities, the store, bindings
//! contributed by ancestor elements, call parameters and `$el`.
//!
//! ## Hydration queue
//!
//! Changes do not re-render anything directly. They request a pass, and the
//! queue makes sure passes run one after another instead of nesting.
//!
//! # Implementation Notes
//!
//! Nothing here tracks fine-grained dependencies. Any change to the store
//! re-hydrates the document; directives are cheap to re-evaluate and the
//! walker skips work it has already done (listeners, cached templates).

mod persistence;
mod runtime;
mod scheduler;
mod scope;
mod store;

pub use persistence::{parse_blob, FileStorage, MemoryStorage, Storage};
pub use runtime::{AssetPreloader, EvalOptions, Runtime};
pub use scheduler::{DrainGuard, HydrationQueue, Target};
pub use scope::Scope;
pub use store::Store;
