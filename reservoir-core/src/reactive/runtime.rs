//! Reactive Runtime
//!
//! The runtime is the one context object everything hangs off: the
//! document, the per-node side table, the store, both logs, the hook and
//! component registries, the hydration queue and the expression cache.
//! Construct one per page (or per test) and pass it by reference.
//!
//! # How It Works
//!
//! 1. A mutation through the public API (`set`, `update`, ...) writes to the
//!    store. If the write changed something, a full-document pass is
//!    requested.
//!
//! 2. `evaluate` runs an expression and compares the store generation
//!    before and after. Expressions may call `set` and friends, so any
//!    change they made also requests a full pass.
//!
//! 3. Requests go through the [`HydrationQueue`]. Outside a pass they are
//!    drained before the mutating call returns. During a pass they are
//!    queued and the running drain picks them up afterwards, so passes
//!    never nest on the call stack.
//!
//! # Borrowing
//!
//! All shared state sits in `RefCell`s. Borrows are kept short and are never
//! held across an evaluation, a hook or a component render, because each of
//! those may call back into the runtime.

use std::cell::{Ref, RefCell};
use std::future::Future;
use std::time::Instant;

use futures_util::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, error, warn};

use super::persistence::{MemoryStorage, Storage};
use super::scheduler::{HydrationQueue, Target};
use super::scope::{self, Scope};
use super::store::Store;
use crate::config::Config;
use crate::dom::{Document, NodeId, SideTable};
use crate::error::{Error, Result};
use crate::expr::{self, EvalError, ExpressionCache, Host, Native, Value};
use crate::hydrate::{self, components, ComponentRegistry, HookPhase, HookRegistry, Props, Refresh};
use crate::logs::{ErrorLog, PerfLog};

/// Fetches assets ahead of use. Implemented outside this crate.
pub trait AssetPreloader {
    /// Warm whatever cache backs `uri`. Failures are [`Error::AssetLoad`].
    fn preload(&self, uri: &str) -> Result<()>;
}

/// Options for [`Runtime::evaluate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalOptions {
    /// Suppress reporting of unexpected failures. Expected failures are
    /// still recorded in the error log.
    pub silent: bool,
}

impl EvalOptions {
    pub fn silent() -> Self {
        Self { silent: true }
    }
}

/// The hydration runtime.
pub struct Runtime {
    config: Config,
    pub(crate) document: RefCell<Document>,
    pub(crate) nodes: RefCell<SideTable>,
    pub(crate) store: RefCell<Store>,
    errors: ErrorLog,
    perf: PerfLog,
    pub(crate) hooks: HookRegistry,
    pub(crate) components: ComponentRegistry,
    queue: HydrationQueue,
    expressions: ExpressionCache,
    preloader: RefCell<Option<Box<dyn AssetPreloader>>>,
}

impl Runtime {
    /// Create a runtime over `document`, persisting into `storage`.
    pub fn new(document: Document, storage: impl Storage + 'static, config: Config) -> Self {
        let errors = ErrorLog::new();
        let store = Store::new(
            Box::new(storage),
            config.local_storage_key.clone(),
            errors.clone(),
        );
        Self {
            config,
            document: RefCell::new(document),
            nodes: RefCell::new(SideTable::new()),
            store: RefCell::new(store),
            errors,
            perf: PerfLog::new(),
            hooks: HookRegistry::new(),
            components: ComponentRegistry::new(),
            queue: HydrationQueue::new(),
            expressions: ExpressionCache::new(),
            preloader: RefCell::new(None),
        }
    }

    /// Parse `html` into a runtime with in-memory storage and default config.
    pub fn from_html(html: &str) -> Self {
        Self::new(Document::parse(html), MemoryStorage::new(), Config::default())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Preload configured assets, merge persisted state, hydrate the
    /// document, then mark the store loaded.
    pub fn init(&self) {
        self.preload_assets();
        self.load_from_storage(true);
    }

    pub fn set_asset_preloader(&self, preloader: impl AssetPreloader + 'static) {
        *self.preloader.borrow_mut() = Some(Box::new(preloader));
    }

    fn preload_assets(&self) {
        let preloader = self.preloader.borrow();
        let Some(preloader) = preloader.as_ref() else {
            if !self.config.preload_assets.is_empty() {
                debug!(
                    assets = self.config.preload_assets.len(),
                    "no asset preloader installed, skipping preload"
                );
            }
            return;
        };
        for asset in &self.config.preload_assets {
            let uri = format!("{}/assets/img/{asset}", self.config.root_path);
            if let Err(e) = preloader.preload(&uri) {
                warn!(uri = %uri, error = %e, "asset preload failed");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Store API
    // ------------------------------------------------------------------------

    /// Value at a dot path, or `undefined`. A miss is recorded in the error log.
    pub fn get(&self, key: &str) -> Value {
        self.store
            .borrow()
            .get(key)
            .map(Value::from)
            .unwrap_or_default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.borrow().has(key)
    }

    /// Write a value and re-hydrate if it changed. Writing `undefined`
    /// removes the key.
    pub fn set(&self, key: &str, value: impl Into<Value>, persist: bool) {
        if self.write(key, value.into(), persist) {
            self.request_hydration(Target::Document);
        }
    }

    /// Write every entry of an object. Non-objects are ignored.
    pub fn set_from_obj(&self, entries: impl Into<Value>, persist: bool) {
        if self.write_object(entries.into(), persist, false) {
            self.request_hydration(Target::Document);
        }
    }

    /// Write the entries of an object whose keys are currently absent.
    pub fn set_defaults(&self, entries: impl Into<Value>, persist: bool) {
        if self.write_object(entries.into(), persist, true) {
            self.request_hydration(Target::Document);
        }
    }

    /// Read-modify-write.
    pub fn update(&self, key: &str, f: impl FnOnce(Value) -> Value, persist: bool) {
        let next = f(self.get(key));
        self.set(key, next, persist);
    }

    /// Write without requesting hydration. Returns whether state changed.
    pub(crate) fn write(&self, key: &str, value: Value, persist: bool) -> bool {
        let mut store = self.store.borrow_mut();
        match value {
            Value::Undefined => store.remove(key),
            value => store.set(key, value.to_json(), persist),
        }
    }

    fn write_object(&self, entries: Value, persist: bool, defaults_only: bool) -> bool {
        let entries = match entries {
            Value::Object(entries) => entries,
            other => {
                warn!(found = other.type_of(), "expected an object of entries");
                return false;
            }
        };
        if defaults_only {
            let json = entries
                .into_iter()
                .filter(|(_, value)| !value.is_undefined())
                .map(|(key, value)| (key, value.to_json()))
                .collect();
            return self.store.borrow_mut().set_defaults(json, persist);
        }
        let mut changed = false;
        for (key, value) in entries {
            changed |= self.write(&key, value, persist);
        }
        changed
    }

    /// Merge persisted state, optionally hydrate, then mark the store
    /// loaded (flushing deferred saves and waking waiters).
    pub fn load_from_storage(&self, should_hydrate: bool) {
        let changed = self.store.borrow_mut().load();
        debug!(changed, "merged persisted state");
        if should_hydrate {
            self.hydrate(None);
        }
        self.store.borrow_mut().mark_loaded();
    }

    pub fn set_storage_key(&self, key: &str) {
        self.store.borrow_mut().set_storage_key(key);
    }

    pub fn is_loaded(&self) -> bool {
        self.store.borrow().is_loaded()
    }

    /// Resolves once persisted state has been merged.
    pub fn wait_for_loaded(&self) -> impl Future<Output = ()> {
        self.store.borrow_mut().wait_for_loaded().map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    /// Evaluate `source` in the scope of `node`.
    ///
    /// Failures come back as `Err`. Reference and type errors are recorded in
    /// the error log; anything else is reported through `tracing` unless
    /// `options.silent` is set. If the expression changed the store, a full
    /// pass is requested.
    pub fn evaluate(
        &self,
        source: &str,
        node: Option<NodeId>,
        params: &[(&str, Value)],
        options: EvalOptions,
    ) -> std::result::Result<Value, EvalError> {
        let before = self.store.borrow().generation();
        let scope = scope::assemble(self, node, params);
        let result = self.run(source, scope, node, options.silent);
        if self.store.borrow().generation() != before {
            self.request_hydration(Target::Document);
        }
        result
    }

    /// Compile and call `source` against a prepared scope.
    pub(crate) fn run(
        &self,
        source: &str,
        mut scope: Scope,
        el: Option<NodeId>,
        silent: bool,
    ) -> std::result::Result<Value, EvalError> {
        scope.bind("$el", el.map_or(Value::Null, Value::Element));
        scope.retain_identifiers();
        let (names, values) = scope.into_parts();

        let host = EvalHost { runtime: self };
        let this = capabilities();
        let start = Instant::now();
        let result = self
            .expressions
            .compile(source, &names)
            .and_then(|compiled| compiled.call(&host, &this, &values));
        self.perf.record_evaluation(start.elapsed());

        if let Err(e) = &result {
            self.report(source, e, &names, silent);
        }
        result
    }

    fn report(&self, source: &str, e: &EvalError, names: &[String], silent: bool) {
        if e.is_expected() {
            self.errors.record(source, Error::Evaluation(e.clone()));
        } else if silent {
            debug!(expression = source, error = %e, "silent evaluation failed");
        } else if e.is_early_termination() {
            error!(expression = source, params = ?names, "Error executing '{source}': {e}");
        } else {
            error!(expression = source, "Error executing '{source}': {e}");
        }
    }

    // ------------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------------

    /// Hydrate from `root`, or the whole document when `None`.
    pub fn hydrate(&self, root: Option<NodeId>) {
        self.request_hydration(Target::from(root));
    }

    pub(crate) fn request_hydration(&self, target: Target) {
        self.queue.request(target);
        self.drain();
    }

    /// Run queued passes until the queue is empty, unless a drain further up
    /// the stack is already doing that.
    fn drain(&self) {
        let Some(_guard) = self.queue.begin_drain() else {
            return;
        };
        let budget = self.config.max_settle_passes.max(1);
        let mut passes = 0;
        while let Some(target) = self.queue.next() {
            if passes == budget {
                self.queue.clear();
                error!(passes, "hydration did not settle, dropping queued passes");
                self.errors.record("hydrate", Error::Unsettled { passes });
                break;
            }
            passes += 1;
            hydrate::run_pass(self, target);
        }
    }

    /// Register a hook. `phase` is `preHydrate` or `postHydrate`.
    pub fn add_hook(&self, phase: HookPhase, hook: impl Fn(&Runtime, NodeId) + 'static) {
        self.hooks.add(phase, hook);
    }

    /// Register a reactive component for `tag`. Tags must contain a dash
    /// and may only be registered once.
    ///
    /// An instance re-renders only when its attributes change or on
    /// [`reload_component`](Self::reload_component). Store values the render
    /// reads through `rt.get` are not tracked; pass them in as `$.name`
    /// props, or use [`register_live_component`](Self::register_live_component).
    pub fn register_component(
        &self,
        tag: &str,
        render: impl Fn(&Runtime, &Props) -> Option<String> + 'static,
    ) -> Result<()> {
        self.components.register(tag, render)
    }

    /// Like [`register_component`](Self::register_component), but instances
    /// also re-render on every full-document pass.
    pub fn register_live_component(
        &self,
        tag: &str,
        render: impl Fn(&Runtime, &Props) -> Option<String> + 'static,
    ) -> Result<()> {
        self.components.register_with(tag, Refresh::EveryPass, render)
    }

    /// Re-render a component instance now and hydrate what it produced.
    pub fn reload_component(&self, node: NodeId) -> Result<()> {
        if components::render(self, node)? {
            self.request_hydration(Target::Subtree(node));
        }
        Ok(())
    }

    /// Set an attribute the way script code would. A component whose
    /// attributes changed re-renders.
    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let changed = self.document.borrow_mut().set_attribute(node, name, value);
        if changed && components::observe(self, node)? {
            self.request_hydration(Target::Subtree(node));
        }
        Ok(())
    }

    /// Change a form control's value, as a user typing would. Fire an event
    /// with [`dispatch`](Self::dispatch) to notify bindings.
    pub fn set_value(&self, node: NodeId, value: &str) -> bool {
        self.document.borrow_mut().set_value(node, value)
    }

    /// Fire `event` at `node`, running every listener registered for it.
    pub fn dispatch(&self, node: NodeId, event: &str) -> Result<()> {
        hydrate::dispatch(self, node, event)
    }

    // ------------------------------------------------------------------------
    // Logs and document access
    // ------------------------------------------------------------------------

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn performance(&self) -> &PerfLog {
        &self.perf
    }

    /// Read access to the document. Drop the guard before calling back into
    /// the runtime.
    pub fn document(&self) -> Ref<'_, Document> {
        self.document.borrow()
    }

    /// Serialized markup of the whole document.
    pub fn html(&self) -> String {
        let document = self.document.borrow();
        document.inner_html(document.root())
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        self.document.borrow().inner_html(node)
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.document.borrow().get_element_by_id(id)
    }
}

/// The runtime API as an object, used as `this` in expressions.
fn capabilities() -> Value {
    Value::Object(
        Native::CAPABILITIES
            .iter()
            .map(|native| (native.name().to_string(), Value::Native(*native)))
            .collect::<IndexMap<_, _>>(),
    )
}

/// [`Host`] handed to compiled expressions.
///
/// Mutations made here do not request hydration themselves; `evaluate`
/// notices the changed generation once the expression returns.
struct EvalHost<'a> {
    runtime: &'a Runtime,
}

impl Host for EvalHost<'_> {
    fn call_capability(&self, native: Native, args: &[Value]) -> std::result::Result<Value, EvalError> {
        let runtime = self.runtime;
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let key = || arg(0).to_js_string();

        match native {
            Native::Get => Ok(runtime.get(&key())),
            Native::Has => Ok(Value::Bool(runtime.has(&key()))),
            Native::Set => {
                match arg(0) {
                    entries @ Value::Object(_) => {
                        runtime.write_object(entries, arg(1).is_truthy(), false);
                    }
                    other => {
                        runtime.write(&other.to_js_string(), arg(1), arg(2).is_truthy());
                    }
                }
                Ok(Value::Undefined)
            }
            Native::Update => {
                let key = key();
                let next = expr::call_value(self, &arg(1), &[runtime.get(&key)], "update")?;
                runtime.write(&key, next, arg(2).is_truthy());
                Ok(Value::Undefined)
            }
            Native::SetDefaults | Native::SetFromObj => {
                let entries = arg(0);
                if entries.as_object().is_none() {
                    return Err(EvalError::Type(format!(
                        "{} expects an object, got {}",
                        native.name(),
                        entries.type_of()
                    )));
                }
                runtime.write_object(entries, arg(1).is_truthy(), native == Native::SetDefaults);
                Ok(Value::Undefined)
            }
            Native::Hydrate => {
                let target = match arg(0) {
                    Value::Element(id) => Target::Subtree(id),
                    _ => Target::Document,
                };
                runtime.request_hydration(target);
                Ok(Value::Undefined)
            }
            other => expr::call_value(self, &Value::Native(other), args, other.name()),
        }
    }

    fn element_property(&self, id: NodeId, name: &str) -> std::result::Result<Value, EvalError> {
        let document = self.runtime.document.borrow();
        if !document.is_element(id) {
            return Ok(Value::Undefined);
        }
        Ok(match name {
            "value" => document.value(id).map(Value::String).unwrap_or_default(),
            "tagName" => document
                .tag(id)
                .map(|tag| Value::String(tag.to_ascii_uppercase()))
                .unwrap_or_default(),
            "id" => Value::from(document.attribute(id, "id").unwrap_or_default()),
            "className" => Value::from(document.attribute(id, "class").unwrap_or_default()),
            "textContent" => Value::String(document.text_content(id)),
            "innerHTML" => Value::String(document.inner_html(id)),
            "parentElement" => document
                .parent_element(id)
                .map_or(Value::Null, Value::Element),
            _ => Value::Undefined,
        })
    }

    fn element_method(&self, id: NodeId, name: &str, args: &[Value]) -> std::result::Result<Value, EvalError> {
        let attribute = args.first().map(Value::to_js_string).unwrap_or_default();
        let document = self.runtime.document.borrow();
        match name {
            "getAttribute" => Ok(document
                .attribute(id, &attribute.to_ascii_lowercase())
                .map_or(Value::Null, Value::from)),
            "hasAttribute" => Ok(Value::Bool(
                document.has_attribute(id, &attribute.to_ascii_lowercase()),
            )),
            _ => Err(EvalError::Type(format!("$el.{name} is not a function"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_hydrates_once_per_change() {
        let rt = Runtime::from_html("<p $='count'></p>");
        rt.set("count", 1, false);
        assert_eq!(rt.performance().document_passes(), 1);
        rt.set("count", 1, false);
        assert_eq!(rt.performance().document_passes(), 1);
        rt.set("count", 2, false);
        assert_eq!(rt.performance().document_passes(), 2);
    }

    #[test]
    fn test_setting_undefined_removes_key() {
        let rt = Runtime::from_html("");
        rt.set("theme", "dark", false);
        assert!(rt.has("theme"));
        rt.set("theme", Value::Undefined, false);
        assert!(rt.store.borrow().lookup("theme").is_none());
    }

    #[test]
    fn test_evaluate_sees_store_and_params() {
        let rt = Runtime::from_html("");
        rt.set("count", 2, false);
        let value = rt
            .evaluate("count * n", None, &[("n", Value::from(5))], EvalOptions::default())
            .unwrap();
        assert_eq!(value, Value::from(10));
    }

    #[test]
    fn test_expression_side_effects_request_a_pass() {
        let rt = Runtime::from_html("<p></p>");
        let passes = rt.performance().document_passes();
        rt.evaluate("set('clicked', true)", None, &[], EvalOptions::default())
            .unwrap();
        assert_eq!(rt.get("clicked"), Value::Bool(true));
        assert_eq!(rt.performance().document_passes(), passes + 1);

        rt.evaluate("this.update('n', n => (n ?? 0) + 1)", None, &[], EvalOptions::default())
            .unwrap();
        assert_eq!(rt.get("n"), Value::from(1));
    }

    #[test]
    fn test_reference_errors_are_logged_not_reported() {
        let rt = Runtime::from_html("");
        let result = rt.evaluate("nope + 1", None, &[], EvalOptions::default());
        assert_eq!(result, Err(EvalError::Reference("nope".into())));
        let entry = rt.errors().last().unwrap();
        assert_eq!(entry.expression, "nope + 1");
        assert_eq!(entry.error.to_string(), "ReferenceError: nope is not defined");
    }

    #[test]
    fn test_syntax_errors_are_not_logged() {
        let rt = Runtime::from_html("");
        let result = rt.evaluate("a) + (b", None, &[], EvalOptions::silent());
        assert!(matches!(result, Err(EvalError::Syntax { early: true, .. })));
        assert!(rt.errors().is_empty());
    }

    #[test]
    fn test_deeply_nested_expressions_fail_cleanly() {
        let rt = Runtime::from_html("");
        let source = format!("{}1{}", "(".repeat(3000), ")".repeat(3000));
        let result = rt.evaluate(&source, None, &[], EvalOptions::default());
        assert!(matches!(result, Err(EvalError::Syntax { early: false, .. })));

        assert_eq!(
            rt.evaluate("(1 + 2) * 3", None, &[], EvalOptions::default()),
            Ok(Value::from(9))
        );
        assert_eq!(rt.performance().evaluations().count, 2);
    }

    #[test]
    fn test_set_from_obj_and_defaults() {
        let rt = Runtime::from_html("");
        rt.set_from_obj(json!({"a": 1, "b": 2}), false);
        rt.set_defaults(json!({"b": 20, "c": 30}), false);
        assert_eq!(rt.get("a"), Value::from(1));
        assert_eq!(rt.get("b"), Value::from(2));
        assert_eq!(rt.get("c"), Value::from(30));
    }

    #[test]
    fn test_wait_for_loaded_resolves_after_load() {
        let rt = Runtime::from_html("");
        let mut waiting = Box::pin(rt.wait_for_loaded());
        assert!(waiting.as_mut().now_or_never().is_none());
        rt.load_from_storage(false);
        assert!(waiting.now_or_never().is_some());
        assert!(rt.wait_for_loaded().now_or_never().is_some());
    }

    #[test]
    fn test_runaway_directive_is_cut_off() {
        let mut config = Config::default();
        config.max_settle_passes = 5;
        let rt = Runtime::new(
            Document::parse("<p $=\"update('n', n => (n ?? 0) + 1)\"></p>"),
            MemoryStorage::new(),
            config,
        );
        rt.hydrate(None);
        assert_eq!(rt.performance().document_passes(), 5);
        assert!(matches!(
            *rt.errors().last().unwrap().error,
            Error::Unsettled { passes: 5 }
        ));
    }

    struct FailingPreloader;

    impl AssetPreloader for FailingPreloader {
        fn preload(&self, uri: &str) -> Result<()> {
            Err(Error::AssetLoad {
                uri: uri.to_string(),
                reason: "offline".into(),
            })
        }
    }

    #[test]
    fn test_init_survives_asset_failures() {
        let config = Config::from_json(r#"{"preloadAssets": ["logo.svg"], "rootPath": "/static"}"#).unwrap();
        let rt = Runtime::new(Document::parse("<p></p>"), MemoryStorage::new(), config);
        rt.set_asset_preloader(FailingPreloader);
        rt.init();
        assert!(rt.is_loaded());
        assert_eq!(rt.performance().document_passes(), 1);
    }
}
