//! Integration Tests for the Hydration Runtime
//!
//! These tests drive the public API the way a page would: build a runtime
//! over some markup, mutate state, fire events, and inspect the result.

use std::cell::Cell;
use std::rc::Rc;

use futures_util::FutureExt;
use serde_json::json;

use reservoir_core::config::DEFAULT_STORAGE_KEY;
use reservoir_core::{
    Config, Document, Error, EvalError, EvalOptions, FileStorage, HookPhase, MemoryStorage, Runtime,
    Value,
};

fn runtime_with(html: &str, storage: MemoryStorage) -> Runtime {
    Runtime::new(Document::parse(html), storage, Config::default())
}

/// Writing the same value twice re-hydrates exactly once.
#[test]
fn repeated_set_hydrates_once() {
    let rt = Runtime::from_html(r#"<p $="count"></p>"#);
    rt.set("count", 3, false);
    rt.set("count", 3, false);
    assert_eq!(rt.performance().document_passes(), 1);

    rt.set("user", json!({"name": "Ada"}), false);
    rt.set("user", json!({"name": "Ada"}), false);
    assert_eq!(rt.performance().document_passes(), 2);
}

/// A missing nested path reads as undefined and logs one error.
#[test]
fn missing_path_logs_one_error() {
    let rt = Runtime::from_html("");
    rt.set("user", json!({"name": "Ada"}), false);

    assert_eq!(rt.get("user.address.city"), Value::Undefined);
    assert_eq!(rt.errors().len(), 1);
    let entry = rt.errors().last().unwrap();
    assert_eq!(entry.expression, "user.address.city");
    assert!(matches!(*entry.error, Error::KeyNotFound(_)));

    assert_eq!(rt.get("user.name"), Value::from("Ada"));
    assert!(!rt.has("user.age"));
}

/// Hydrating an unchanged document twice yields identical markup.
#[test]
fn hydration_is_idempotent() {
    let rt = Runtime::from_html(concat!(
        r#"<main pour.title="'Inventory'">"#,
        r#"<h1 $="title" $end>: </h1>"#,
        r#"<ul foreach="item in items" each.class="item.kind"><li $="item.name"></li></ul>"#,
        r#"<a $.href="'/items/' + items.length">all</a>"#,
        r#"<input @="query">"#,
        r#"</main>"#,
    ));
    rt.set(
        "items",
        json!([{"name": "bolt", "kind": "metal"}, {"name": "rope", "kind": "fibre"}]),
        false,
    );
    let first = rt.html();
    rt.hydrate(None);
    assert_eq!(rt.html(), first);
    rt.hydrate(None);
    assert_eq!(rt.html(), first);

    assert!(first.contains(r#"<h1 $="title" $end="" dry=": ">: Inventory</h1>"#));
    assert!(first.contains(r#"<div class="metal"><li $="item.name" dry="">bolt</li></div>"#));
    assert!(first.contains(r#"href="/items/2""#));
}

/// A non-array `foreach` result keeps the old rows and logs the problem.
#[test]
fn foreach_non_array_keeps_rows() {
    let rt = Runtime::from_html(r#"<ol foreach="row in rows"><span $="row"></span></ol>"#);
    rt.set("rows", json!(["a", "b", "c"]), false);
    let ol = rt.document().find_by_tag("ol")[0];
    let rendered = rt.inner_html(ol);
    assert_eq!(rt.document().children(ol).len(), 3);

    rt.set("rows", json!({"not": "a list"}), false);
    assert_eq!(rt.inner_html(ol), rendered);
    let entry = rt.errors().last().unwrap();
    assert_eq!(
        entry.error.to_string(),
        "foreach `row in rows` value is not an array: object"
    );
}

/// A `foreach` whose expression fails clears the list.
#[test]
fn foreach_failure_clears_rows() {
    let rt = Runtime::from_html(r#"<ol foreach="row in data.rows"><span $="row"></span></ol>"#);
    rt.set("data", json!({"rows": [1, 2]}), false);
    let ol = rt.document().find_by_tag("ol")[0];
    assert_eq!(rt.document().children(ol).len(), 2);

    rt.set("data", json!(null), false);
    assert_eq!(rt.inner_html(ol), "");
    assert_eq!(
        rt.document().attribute(ol, "foreach-dry"),
        Some(r#"<span $="row"></span>"#)
    );
}

/// Two-way binding works in both directions.
#[test]
fn two_way_binding() {
    let rt = Runtime::from_html(r#"<input id="name" @="name"><p $="name"></p>"#);
    rt.set("name", "Ada", false);
    let input = rt.element_by_id("name").unwrap();
    assert_eq!(rt.document().value(input).as_deref(), Some("Ada"));

    rt.set_value(input, "Grace");
    rt.dispatch(input, "input").unwrap();
    assert_eq!(rt.get("name"), Value::from("Grace"));

    let p = rt.document().find_by_tag("p")[0];
    assert_eq!(rt.inner_html(p), "Grace");
}

/// A truthy guard hides the element and skips its children until it turns falsy.
#[test]
fn visibility_guard() {
    let rt = Runtime::from_html(r#"<div hidden="count <= 0"><b $="count"></b></div>"#);
    rt.set("count", 0, false);
    let div = rt.document().find_by_tag("div")[0];
    let b = rt.document().find_by_tag("b")[0];
    assert_eq!(rt.document().attribute(div, "aria-hidden"), Some("true"));
    assert_eq!(rt.inner_html(b), "");

    rt.set("count", 1, false);
    assert!(!rt.document().has_attribute(div, "aria-hidden"));
    assert_eq!(rt.inner_html(b), "1");
}

/// Re-rendering a list on every pass keeps the document arena bounded.
#[test]
fn rerendered_lists_reuse_node_slots() {
    let rt = Runtime::from_html(r#"<ul foreach="row in rows"><li $="row + tick"></li></ul>"#);
    rt.set("rows", json!((0..100).collect::<Vec<_>>()), false);
    rt.set("tick", 0, false);
    let live = rt.document().len();
    let capacity = rt.document().capacity();

    for tick in 1..=1_000 {
        rt.set("tick", tick, false);
    }

    assert_eq!(rt.document().len(), live);
    assert!(rt.document().capacity() <= capacity * 2);
    let ul = rt.document().find_by_tag("ul")[0];
    assert_eq!(rt.document().children(ul).len(), 100);
}

/// Pathologically nested attribute text is rejected without taking the
/// rest of the page down.
#[test]
fn deeply_nested_directive_is_contained() {
    let deep = format!("{}count{}", "[".repeat(5000), "]".repeat(5000));
    let rt = Runtime::from_html(&format!(r#"<p id="deep" $="{deep}"></p><p id="shallow" $="count"></p>"#));
    rt.set("count", 3, false);

    let shallow = rt.element_by_id("shallow").unwrap();
    assert_eq!(rt.inner_html(shallow), "3");
    let deep = rt.element_by_id("deep").unwrap();
    assert_eq!(rt.inner_html(deep), "");
}

/// Persisted keys survive a simulated reload.
#[test]
fn persistence_round_trip() {
    let storage = MemoryStorage::new();
    let rt = runtime_with("", storage.clone());
    rt.init();
    rt.set("theme", "dark", true);
    rt.set("scratch", "temporary", false);
    drop(rt);

    let reloaded = runtime_with(r#"<body $="theme"></body>"#, storage);
    reloaded.init();
    assert_eq!(reloaded.get("theme"), Value::from("dark"));
    assert!(!reloaded.has("scratch"));
    let body = reloaded.document().find_by_tag("body")[0];
    assert_eq!(reloaded.inner_html(body), "dark");
}

/// Persisted state also survives a reload from disk.
#[test]
fn file_storage_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let rt = Runtime::new(Document::new(), FileStorage::new(dir.path()), Config::default());
    rt.init();
    rt.set("settings", json!({"volume": 7}), true);

    let reloaded = Runtime::new(Document::new(), FileStorage::new(dir.path()), Config::default());
    reloaded.init();
    assert_eq!(reloaded.get("settings.volume"), Value::from(7));
}

/// Writes made before the store is loaded are not saved until it is.
#[test]
fn saves_wait_for_load() {
    let storage = MemoryStorage::with_item(DEFAULT_STORAGE_KEY, r#"{"theme": "light"}"#);
    let rt = runtime_with("", storage.clone());
    rt.set("lang", "en", true);
    assert_eq!(storage.len(), 1);

    let mut loaded = Box::pin(rt.wait_for_loaded());
    assert!(loaded.as_mut().now_or_never().is_none());
    rt.load_from_storage(false);
    assert!(loaded.now_or_never().is_some());

    let reloaded = runtime_with("", storage);
    reloaded.init();
    assert_eq!(reloaded.get("theme"), Value::from("light"));
    assert_eq!(reloaded.get("lang"), Value::from("en"));
}

/// A corrupt persisted blob is discarded and logged.
#[test]
fn corrupt_storage_is_discarded() {
    let storage = MemoryStorage::with_item(DEFAULT_STORAGE_KEY, "[1, 2, 3]");
    let rt = runtime_with("", storage);
    rt.init();
    assert!(rt.is_loaded());
    let entry = rt.errors().last().unwrap();
    assert!(matches!(*entry.error, Error::StorageParse(_)));
}

/// The storage namespace is configurable.
#[test]
fn custom_storage_key() {
    let storage = MemoryStorage::with_item("app-state", r#"{"seen": true}"#);
    let config = Config::from_json(r#"{"localStorageKey": "app-state"}"#).unwrap();
    let rt = Runtime::new(Document::new(), storage, config);
    rt.init();
    assert_eq!(rt.get("seen"), Value::Bool(true));
}

/// Expressions can mutate state; the page re-hydrates afterwards.
#[test]
fn expression_side_effects() {
    let rt = Runtime::from_html(
        r#"<button @.click="setFromObj({open: !open, clicks: clicks + 1})"></button><p $="open ? 'open' : 'closed'"></p>"#,
    );
    rt.set_defaults(json!({"open": false, "clicks": 0}), false);
    let button = rt.document().find_by_tag("button")[0];
    let p = rt.document().find_by_tag("p")[0];
    assert_eq!(rt.inner_html(p), "closed");

    rt.dispatch(button, "click").unwrap();
    assert_eq!(rt.inner_html(p), "open");
    assert_eq!(rt.get("clicks"), Value::from(1));
}

/// Evaluation failures come back as errors, distinct from falsy values.
#[test]
fn evaluation_sentinel() {
    let rt = Runtime::from_html("");
    rt.set("flag", false, false);
    assert_eq!(
        rt.evaluate("flag", None, &[], EvalOptions::default()),
        Ok(Value::Bool(false))
    );
    assert_eq!(
        rt.evaluate("nope", None, &[], EvalOptions::default()),
        Err(EvalError::Reference("nope".into()))
    );
    assert_eq!(
        rt.evaluate("typeof nope", None, &[], EvalOptions::default()),
        Ok(Value::from("undefined"))
    );
}

/// A component renders, hydrates what it produced, and re-renders on change.
#[test]
fn component_lifecycle() {
    let rt = Runtime::from_html(r#"<greeting-card who="world"></greeting-card>"#);
    let renders = Rc::new(Cell::new(0));
    let counter = renders.clone();
    rt.register_component("greeting-card", move |_, props| {
        counter.set(counter.get() + 1);
        let who = props.get_str("who").unwrap_or("nobody");
        Some(format!(r#"<span $="'Hello, ' + '{who}'"></span>"#))
    })
    .unwrap();
    assert!(rt.register_component("greeting-card", |_, _| None).is_err());

    rt.hydrate(None);
    let card = rt.document().find_by_tag("greeting-card")[0];
    let span = rt.document().find_by_tag("span")[0];
    assert_eq!(rt.inner_html(span), "Hello, world");

    rt.hydrate(None);
    assert_eq!(renders.get(), 1);

    rt.set_attribute(card, "who", "Ada").unwrap();
    assert_eq!(renders.get(), 2);
    let span = rt.document().find_by_tag("span")[0];
    assert_eq!(rt.inner_html(span), "Hello, Ada");
}

/// Hooks run around every node in document order.
#[test]
fn hooks_see_every_node() {
    let rt = Runtime::from_html("<main><p></p><p></p></main>");
    let entered = Rc::new(Cell::new(0));
    let left = Rc::new(Cell::new(0));
    let (e, l) = (entered.clone(), left.clone());
    rt.add_hook("preHydrate".parse::<HookPhase>().unwrap(), move |_, _| e.set(e.get() + 1));
    rt.add_hook(HookPhase::Post, move |_, _| l.set(l.get() + 1));
    rt.hydrate(None);
    assert_eq!(entered.get(), 4);
    assert_eq!(left.get(), 4);
}

/// A directive that changes state on every pass is cut off.
#[test]
fn runaway_updates_are_bounded() {
    let rt = Runtime::from_html(r#"<p $="update('ticks', t => (t ?? 0) + 1)"></p>"#);
    rt.hydrate(None);
    let limit = Config::default().max_settle_passes;
    assert_eq!(rt.performance().document_passes(), limit);
    assert!(rt
        .errors()
        .entries()
        .iter()
        .any(|e| matches!(*e.error, Error::Unsettled { .. })));
}
