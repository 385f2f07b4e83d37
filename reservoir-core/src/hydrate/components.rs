//! Reactive Components
//!
//! A component is a render callback registered for a custom tag. Every
//! element with that tag is an instance: the walker renders it when it
//! first sees it and again whenever its attributes no longer match the
//! snapshot taken after the previous render.
//!
//! Store reads inside a render are not tracked. A component registered
//! with [`Refresh::EveryPass`] is also re-rendered on every full-document
//! pass, which is what a render that reads store state needs.
//!
//! # Props
//!
//! Each render gets a fresh, immutable [`Props`]:
//!
//! - every plain attribute, kebab-case names converted to camelCase
//! - every `$.name` attribute, evaluated as an expression
//! - `content`: the instance's dry markup (what it held before first render)
//! - `id`: a process-wide, monotonically increasing instance id

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::strip_family;
use crate::dom::{ComponentState, NodeId};
use crate::error::{Error, Result};
use crate::expr::Value;
use crate::logs::RenderTarget;
use crate::reactive::{EvalOptions, Runtime};

/// Render callback. `None` leaves the instance's markup alone.
pub type RenderFn = Rc<dyn Fn(&Runtime, &Props) -> Option<String>>;

/// Next instance id. Shared across runtimes so ids never repeat.
fn next_instance_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Properties handed to a render callback.
#[derive(Debug, Clone)]
pub struct Props {
    /// Instance id for this render.
    pub id: u64,
    /// The instance element.
    pub element: NodeId,
    /// Dry markup of the instance.
    pub content: String,
    values: IndexMap<String, Value>,
}

impl Props {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A prop as a string slice, if it is a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// When an already rendered instance renders again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Refresh {
    /// Only when its attributes change.
    #[default]
    OnAttributeChange,
    /// Also on every full-document pass.
    EveryPass,
}

#[derive(Clone)]
struct Registration {
    render: RenderFn,
    refresh: Refresh,
}

/// Registered components, by lowercase tag.
#[derive(Default)]
pub struct ComponentRegistry {
    renderers: RefCell<IndexMap<String, Registration>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `render` for `tag`.
    ///
    /// Tags must contain a dash and may only be registered once.
    pub fn register(
        &self,
        tag: &str,
        render: impl Fn(&Runtime, &Props) -> Option<String> + 'static,
    ) -> Result<()> {
        self.register_with(tag, Refresh::default(), render)
    }

    pub fn register_with(
        &self,
        tag: &str,
        refresh: Refresh,
        render: impl Fn(&Runtime, &Props) -> Option<String> + 'static,
    ) -> Result<()> {
        let tag = tag.to_ascii_lowercase();
        if !tag.contains('-') {
            return Err(Error::InvalidComponentName(tag));
        }
        let mut renderers = self.renderers.borrow_mut();
        if renderers.contains_key(&tag) {
            return Err(Error::DuplicateComponent(tag));
        }
        debug!(tag = %tag, ?refresh, "registered component");
        renderers.insert(
            tag,
            Registration {
                render: Rc::new(render),
                refresh,
            },
        );
        Ok(())
    }

    pub fn get(&self, tag: &str) -> Option<RenderFn> {
        self.renderers.borrow().get(tag).map(|r| r.render.clone())
    }

    pub fn refresh(&self, tag: &str) -> Option<Refresh> {
        self.renderers.borrow().get(tag).map(|r| r.refresh)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.renderers.borrow().contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.renderers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.borrow().is_empty()
    }
}

/// `data-user-id` to `dataUserId`.
fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c == '-' {
            match chars.next() {
                Some(next) => out.extend(next.to_uppercase()),
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// First component check of a visit. On a full-document pass an
/// [`Refresh::EveryPass`] instance renders again even if nothing changed.
pub(crate) fn refresh(runtime: &Runtime, node: NodeId, full_pass: bool) -> Result<bool> {
    if full_pass {
        let every_pass = runtime
            .document
            .borrow()
            .tag(node)
            .and_then(|tag| runtime.components.refresh(tag))
            == Some(Refresh::EveryPass);
        let rendered = runtime
            .nodes
            .borrow()
            .get(node)
            .is_some_and(|state| state.component.is_some());
        if every_pass && rendered {
            return render(runtime, node);
        }
    }
    observe(runtime, node)
}

/// Render `node` if it is an instance whose attributes changed since its
/// last render (or that was never rendered). Returns whether it rendered.
pub(crate) fn observe(runtime: &Runtime, node: NodeId) -> Result<bool> {
    let current = {
        let document = runtime.document.borrow();
        let Some(data) = document.element(node) else {
            return Ok(false);
        };
        if !runtime.components.contains(&data.tag) {
            return Ok(false);
        }
        data.attributes.clone()
    };
    let unchanged = runtime
        .nodes
        .borrow()
        .get(node)
        .and_then(|state| state.component.as_ref())
        .is_some_and(|state| state.attributes == current);
    if unchanged {
        return Ok(false);
    }
    render(runtime, node)
}

/// Render `node` unconditionally. Returns `false` if it is not an instance
/// of a registered component.
pub(crate) fn render(runtime: &Runtime, node: NodeId) -> Result<bool> {
    let start = Instant::now();
    let tag = match runtime.document.borrow().tag(node) {
        Some(tag) => tag.to_string(),
        None => return Ok(false),
    };
    let Some(renderer) = runtime.components.get(&tag) else {
        return Ok(false);
    };

    let directives = &runtime.config().directives;
    runtime
        .document
        .borrow_mut()
        .add_class(node, &directives.container_class);

    let props = props(runtime, node)?;
    let html = renderer(runtime, &props);

    {
        let mut document = runtime.document.borrow_mut();
        if !document.contains(node) {
            warn!(tag = %tag, "component removed itself while rendering");
            return Ok(false);
        }
        if let Some(html) = html {
            let removed = document.set_inner_html(node, &html);
            runtime.nodes.borrow_mut().forget(&removed);
        }
        if !document.has_attribute(node, &directives.dry) {
            document.set_attribute(node, &directives.dry, &props.content);
        }
        let attributes = document
            .element(node)
            .map(|data| data.attributes.clone())
            .unwrap_or_default();
        runtime.nodes.borrow_mut().entry(node).component = Some(ComponentState {
            instance: props.id,
            attributes,
        });
    }

    let elapsed = start.elapsed();
    runtime
        .performance()
        .record_render(RenderTarget::Component(tag.clone()), elapsed);
    debug!(tag = %tag, instance = props.id, ?elapsed, "rendered component");
    Ok(true)
}

fn props(runtime: &Runtime, node: NodeId) -> Result<Props> {
    let directives = &runtime.config().directives;
    let family = directives.exec_family();
    let (attributes, content) = {
        let document = runtime.document.borrow();
        let attributes: Vec<(String, String)> = document
            .element(node)
            .map(|data| data.attributes.clone().into_iter().collect())
            .unwrap_or_default();
        let content = document
            .attribute(node, &directives.dry)
            .map(str::to_string)
            .unwrap_or_else(|| document.inner_html(node));
        (attributes, content)
    };

    let mut values = IndexMap::new();
    for (attribute, raw) in attributes {
        if let Some(name) = strip_family(&attribute, &family) {
            if raw.trim().is_empty() {
                return Err(Error::malformed(attribute, "component prop expression is empty"));
            }
            // A failed prop evaluates to undefined; the render still runs.
            let value = runtime
                .evaluate(&raw, Some(node), &[], EvalOptions::default())
                .unwrap_or_default();
            values.insert(camel_case(name), value);
        } else if !attribute.starts_with(&directives.exec_prefix) {
            // Evaluated props win over the literal attribute they write back.
            values
                .entry(camel_case(&attribute))
                .or_insert(Value::String(raw));
        }
    }

    Ok(Props {
        id: next_instance_id(),
        element: node,
        content,
        values,
    })
}
