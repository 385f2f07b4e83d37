//! Hydration Walker
//!
//! A pass walks the document (or one subtree) depth-first and interprets
//! directive attributes on every element it reaches.
//!
//! # Algorithm
//!
//! For each element, in order:
//!
//! 1. Run pre-hydration hooks.
//! 2. Render it if it is a component instance that needs rendering. On a
//!    full-document pass this includes instances registered to refresh on
//!    every pass.
//! 3. Visibility gate. A hidden element is left alone, subtree included.
//! 4. Content injection (`$`).
//! 5. Two-way binding (`@`).
//! 6. Attribute expressions (`$.name`) and event listeners (`@.event`).
//! 7. Re-check the component, since step 6 may have changed its attributes.
//! 8. List expansion (`foreach`).
//! 9. Recurse into child elements unless marked `waterproof`.
//! 10. Run post-hydration hooks.
//!
//! A malformed directive stops steps 2 to 9 for that element only. It is
//! recorded in the error log and the pass moves on to the next sibling.
//!
//! Passes never nest. State changes made while a pass runs queue another
//! pass, which starts once this one is done.

pub mod components;
mod directives;
mod hooks;

use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, error, instrument};

pub use components::{ComponentRegistry, Props, Refresh, RenderFn};
pub use hooks::{Hook, HookPhase, HookRegistry};

use self::directives::Visibility;
use crate::dom::{Listener, NodeId};
use crate::error::{Error, Result};
use crate::expr::Value;
use crate::logs::RenderTarget;
use crate::reactive::{EvalOptions, Runtime, Target};

/// Run one pass over `target`.
#[instrument(level = "debug", skip(runtime))]
pub(crate) fn run_pass(runtime: &Runtime, target: Target) {
    let start = Instant::now();
    let root = match target {
        Target::Document => runtime.document.borrow().root(),
        Target::Subtree(node) => node,
    };
    if !runtime.document.borrow().contains(root) {
        debug!("hydration target is no longer in the document");
        return;
    }

    let full_pass = target == Target::Document;
    visit(runtime, root, full_pass);

    if target == Target::Document {
        let elapsed = start.elapsed();
        runtime
            .performance()
            .record_render(RenderTarget::Document, elapsed);
        debug!(?elapsed, "hydrated document");
    }
}

fn visit(runtime: &Runtime, node: NodeId, full_pass: bool) {
    runtime.hooks.run(HookPhase::Pre, runtime, node);

    if let Err(e) = process(runtime, node, full_pass) {
        let label = runtime
            .document
            .borrow()
            .tag(node)
            .map(|tag| format!("<{tag}>"))
            .unwrap_or_default();
        error!(element = %label, error = %e, "skipping element with malformed directive");
        runtime.errors().record(label, e);
    }

    runtime.hooks.run(HookPhase::Post, runtime, node);
}

fn process(runtime: &Runtime, node: NodeId, full_pass: bool) -> Result<()> {
    if !runtime.document.borrow().contains(node) {
        return Ok(());
    }

    components::refresh(runtime, node, full_pass)?;

    if directives::visibility(runtime, node) == Visibility::Hidden {
        return Ok(());
    }

    directives::content(runtime, node);
    directives::bind(runtime, node)?;
    directives::attributes(runtime, node);
    directives::listeners(runtime, node);

    components::observe(runtime, node)?;

    directives::foreach(runtime, node)?;

    let children = {
        let document = runtime.document.borrow();
        if document.has_attribute(node, &runtime.config().directives.no_recurse) {
            return Ok(());
        }
        document.children(node)
    };
    for child in children {
        // An earlier sibling may have replaced this one.
        if runtime.document.borrow().contains(child) {
            visit(runtime, child, full_pass);
        }
    }
    Ok(())
}

/// Fire `event` at `node`.
///
/// Bind listeners copy the element's value into the store. Expression
/// listeners evaluate whatever their attribute holds now, with `event`
/// bound to `{ type }`.
pub(crate) fn dispatch(runtime: &Runtime, node: NodeId, event: &str) -> Result<()> {
    let listeners = runtime.nodes.borrow().listeners(node, event);
    debug!(%node, event, listeners = listeners.len(), "dispatching event");

    for listener in listeners {
        match listener {
            Listener::Bind { key, persist } => {
                let value = runtime.document.borrow().value(node).unwrap_or_default();
                runtime.set(&key, value, persist);
            }
            Listener::Expression { attribute } => {
                let source = runtime
                    .document
                    .borrow()
                    .attribute(node, &attribute)
                    .map(str::to_string);
                let Some(source) = source else {
                    return Err(Error::malformed(attribute, "listener attribute was removed"));
                };
                if source.trim().is_empty() {
                    continue;
                }
                let mut detail = IndexMap::new();
                detail.insert("type".to_string(), Value::from(event));
                // Failures are already logged by `evaluate`.
                let _ = runtime.evaluate(
                    &source,
                    Some(node),
                    &[("event", Value::Object(detail))],
                    EvalOptions::default(),
                );
            }
        }
    }
    Ok(())
}
