//! Directive handlers, one per reserved attribute family.
//!
//! Each handler reads what it needs from the document, drops its borrows,
//! evaluates, then writes back. Evaluation failures leave the element as it
//! was. Malformed directives come back as `Err` and the walker stops
//! processing the element.

use tracing::{debug, error};

use crate::config::{strip_family, BIND_EVENTS};
use crate::dom::{escape_html, Listener, ListenerKind, NodeId};
use crate::error::{Error, Result};
use crate::expr::{is_valid_identifier, Value};
use crate::reactive::{EvalOptions, Runtime};

/// Outcome of the visibility gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Visibility {
    Shown,
    Hidden,
}

fn attribute(runtime: &Runtime, node: NodeId, name: &str) -> Option<String> {
    runtime
        .document
        .borrow()
        .attribute(node, name)
        .map(str::to_string)
}

fn has_attribute(runtime: &Runtime, node: NodeId, name: &str) -> bool {
    runtime.document.borrow().has_attribute(node, name)
}

fn evaluate(runtime: &Runtime, source: &str, node: NodeId) -> Option<Value> {
    runtime
        .evaluate(source, Some(node), &[], EvalOptions::default())
        .ok()
}

/// Replace the markup of `node`, dropping side-table state of what it held.
fn replace_content(runtime: &Runtime, node: NodeId, html: &str) {
    let removed = runtime.document.borrow_mut().set_inner_html(node, html);
    runtime.nodes.borrow_mut().forget(&removed);
}

/// Conditional visibility.
///
/// The guard is read from the cache attribute first so it survives the
/// `hidden` marker being rewritten. A truthy guard, or one that fails to
/// evaluate, hides the element. A bare `hidden` with no expression keeps
/// its usual meaning.
pub(super) fn visibility(runtime: &Runtime, node: NodeId) -> Visibility {
    let d = &runtime.config().directives;
    let guard = attribute(runtime, node, &d.hidden_cache).or_else(|| attribute(runtime, node, &d.hidden));
    let Some(guard) = guard else {
        return if attribute(runtime, node, &d.aria_hidden).as_deref() == Some("true") {
            Visibility::Hidden
        } else {
            Visibility::Shown
        };
    };
    if guard.trim().is_empty() {
        return Visibility::Hidden;
    }

    runtime
        .document
        .borrow_mut()
        .set_attribute(node, &d.hidden_cache, &guard);

    let hidden = evaluate(runtime, &guard, node).map_or(true, |value| value.is_truthy());
    let mut document = runtime.document.borrow_mut();
    if hidden {
        document.set_attribute(node, &d.aria_hidden, "true");
        document.set_attribute(node, &d.hidden, "");
        Visibility::Hidden
    } else {
        document.remove_attribute(node, &d.aria_hidden);
        document.remove_attribute(node, &d.hidden);
        Visibility::Shown
    }
}

/// Content injection from the bare exec attribute (`$`).
pub(super) fn content(runtime: &Runtime, node: NodeId) {
    let d = &runtime.config().directives;
    let Some(source) = attribute(runtime, node, &d.exec_prefix) else {
        return;
    };
    if source.trim().is_empty() {
        return;
    }

    let (dry, raw, mode_end, mode_replace) = {
        let document = runtime.document.borrow();
        (
            document
                .attribute(node, &d.dry)
                .map(str::to_string)
                .unwrap_or_else(|| document.inner_html(node)),
            document.has_attribute(node, &d.content_raw),
            document.has_attribute(node, &d.content_end),
            document.has_attribute(node, &d.content_replace),
        )
    };

    let Some(value) = evaluate(runtime, &source, node) else {
        return;
    };
    let text = value.stringify();
    let text = if raw { text } else { escape_html(&text) };
    let html = if mode_end {
        format!("{dry}{text}")
    } else if mode_replace {
        text
    } else {
        format!("{text}{dry}")
    };

    let changed = {
        let mut document = runtime.document.borrow_mut();
        if !document.has_attribute(node, &d.dry) {
            document.set_attribute(node, &d.dry, &dry);
        }
        document.inner_html(node) != html
    };
    if changed {
        replace_content(runtime, node, &html);
    }
}

/// Two-way binding from the bare bind attribute (`@`).
pub(super) fn bind(runtime: &Runtime, node: NodeId) -> Result<()> {
    let d = &runtime.config().directives;
    let Some(key) = attribute(runtime, node, &d.bind_prefix) else {
        return Ok(());
    };
    let key = key.trim().to_string();
    if key.is_empty() {
        return Ok(());
    }
    let (has_value, tag) = {
        let document = runtime.document.borrow();
        (
            document.has_value_property(node),
            document.tag(node).unwrap_or_default().to_string(),
        )
    };
    if !has_value {
        return Err(Error::BindTarget { tag });
    }
    let persist = has_attribute(runtime, node, &d.bind_persist);

    {
        let mut nodes = runtime.nodes.borrow_mut();
        for event in BIND_EVENTS {
            let listener = Listener::Bind {
                key: key.clone(),
                persist,
            };
            nodes.track(node, ListenerKind::Bind, event, listener);
        }
    }

    let stored = runtime.store.borrow().lookup(&key).cloned();
    match stored {
        Some(stored) => {
            let text = Value::from(stored).stringify();
            runtime.document.borrow_mut().set_value(node, &text);
        }
        None => {
            let current = runtime.document.borrow().value(node).unwrap_or_default();
            runtime.set(&key, current, persist);
        }
    }
    Ok(())
}

/// `$.name` attributes: evaluate and write the result to `name`.
pub(super) fn attributes(runtime: &Runtime, node: NodeId) {
    let family = runtime.config().directives.exec_family();
    let pending = runtime.document.borrow().attributes_with_prefix(node, &family);
    for (attribute, source) in pending {
        let Some(name) = strip_family(&attribute, &family) else {
            continue;
        };
        if let Some(value) = evaluate(runtime, &source, node) {
            runtime
                .document
                .borrow_mut()
                .set_attribute(node, name, &value.stringify());
        }
    }
}

/// `@.event` attributes: attach one expression listener per event.
pub(super) fn listeners(runtime: &Runtime, node: NodeId) {
    let family = runtime.config().directives.listener_family();
    let pending = runtime.document.borrow().attributes_with_prefix(node, &family);
    let mut nodes = runtime.nodes.borrow_mut();
    for (attribute, _) in pending {
        let Some(event) = strip_family(&attribute, &family) else {
            continue;
        };
        let event = event.to_string();
        let listener = Listener::Expression { attribute };
        if nodes.track(node, ListenerKind::Expression, &event, listener) {
            debug!(%node, event = %event, "attached listener");
        }
    }
}

/// `foreach="item in expr"`.
pub(super) fn foreach(runtime: &Runtime, node: NodeId) -> Result<()> {
    let config = runtime.config();
    let d = &config.directives;
    let Some(directive) = attribute(runtime, node, &d.foreach) else {
        return Ok(());
    };
    let Some((symbol, source)) = directive.split_once(" in ") else {
        return Err(Error::malformed(&d.foreach, format!("`{directive}` is missing its `in` clause")));
    };
    let symbol = symbol.trim();
    let source = source.trim();
    if !is_valid_identifier(symbol) {
        return Err(Error::malformed(&d.foreach, format!("`{symbol}` is not a valid loop variable")));
    }
    if source.is_empty() {
        return Err(Error::malformed(&d.foreach, format!("`{directive}` has no expression")));
    }

    let (template, each) = {
        let mut document = runtime.document.borrow_mut();
        let template = match document.attribute(node, &d.foreach_cache) {
            Some(cached) => cached.to_string(),
            None => {
                let template = document.inner_html(node);
                document.set_attribute(node, &d.foreach_cache, &template);
                template
            }
        };
        (template, document.attributes_with_prefix(node, &d.each_family()))
    };

    let items = match runtime.evaluate(source, Some(node), &[], EvalOptions::default()) {
        Err(_) => {
            replace_content(runtime, node, "");
            return Ok(());
        }
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            error!(directive = %directive, found = other.type_of(), "foreach value is not an array");
            runtime.errors().record(
                directive.clone(),
                Error::NotIterable {
                    directive,
                    found: other.type_of().to_string(),
                },
            );
            return Ok(());
        }
    };

    replace_content(runtime, node, "");
    runtime
        .document
        .borrow_mut()
        .add_class(node, &d.container_class);

    let family = d.each_family();
    for item in items {
        let child = {
            let mut document = runtime.document.borrow_mut();
            let child = document.create_element(&config.foreach_item_tag);
            document.append_child(node, child);
            document.set_inner_html(child, &template);
            child
        };
        runtime.nodes.borrow_mut().bind_local(child, symbol, item);

        for (attribute, source) in &each {
            let Some(name) = strip_family(attribute, &family) else {
                continue;
            };
            if let Some(value) = evaluate(runtime, source, child) {
                runtime
                    .document
                    .borrow_mut()
                    .set_attribute(child, name, &value.stringify());
            }
        }
    }
    Ok(())
}
