//! Runtime Configuration
//!
//! [`Config`] mirrors the initialization object accepted by the browser build
//! (`localStorageKey`, `preloadAssets`, `rootPath`) and adds the reserved
//! attribute names, which are configurable here rather than baked in.

use serde::Deserialize;

/// Namespace key used for the persisted blob when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "__HydrateWebAppLSData__";

/// Events a two-way binding listens to.
pub const BIND_EVENTS: [&str; 6] = ["change", "keyup", "keydown", "click", "input", "blur"];

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Key the persisted subset is stored under.
    pub local_storage_key: String,

    /// Asset identifiers handed to the asset preloader during `init`.
    pub preload_assets: Vec<String>,

    /// Base path for asset resolution.
    pub root_path: String,

    /// Reserved attribute names and prefixes.
    pub directives: Directives,

    /// Tag of the element created per item by `foreach`.
    pub foreach_item_tag: String,

    /// Passes a single drain may run before giving up on settling.
    pub max_settle_passes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_storage_key: DEFAULT_STORAGE_KEY.to_string(),
            preload_assets: Vec::new(),
            root_path: String::new(),
            directives: Directives::default(),
            foreach_item_tag: "div".to_string(),
            max_settle_passes: 64,
        }
    }
}

impl Config {
    /// Parse a configuration object. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Reserved attribute names.
///
/// Prefix families are written `<prefix><delimiter><name>`, e.g. `$.href`
/// or `@.click`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Directives {
    /// Content injection on its own, attribute injection with a delimiter.
    pub exec_prefix: String,
    /// Two-way binding on its own, event listener with a delimiter.
    pub bind_prefix: String,
    pub delimiter: String,
    /// Ancestor-declared bindings.
    pub pour_prefix: String,
    /// Per-item attributes inside a `foreach`.
    pub each_prefix: String,
    pub hidden: String,
    pub hidden_cache: String,
    pub aria_hidden: String,
    /// Cache of an element's pristine inner markup.
    pub dry: String,
    /// Opt out of escaping injected content.
    pub content_raw: String,
    pub content_end: String,
    pub content_replace: String,
    pub bind_persist: String,
    pub foreach: String,
    pub foreach_cache: String,
    /// Stops the walker from descending into children.
    pub no_recurse: String,
    /// Class added to elements whose children are generated.
    pub container_class: String,
}

impl Default for Directives {
    fn default() -> Self {
        Self {
            exec_prefix: "$".into(),
            bind_prefix: "@".into(),
            delimiter: ".".into(),
            pour_prefix: "pour".into(),
            each_prefix: "each".into(),
            hidden: "hidden".into(),
            hidden_cache: "hidden-dry".into(),
            aria_hidden: "aria-hidden".into(),
            dry: "dry".into(),
            content_raw: "$raw".into(),
            content_end: "$end".into(),
            content_replace: "$replace".into(),
            bind_persist: "@persist".into(),
            foreach: "foreach".into(),
            foreach_cache: "foreach-dry".into(),
            no_recurse: "waterproof".into(),
            container_class: "reservoir-container".into(),
        }
    }
}

impl Directives {
    fn family(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.delimiter)
    }

    /// `$.` by default.
    pub fn exec_family(&self) -> String {
        self.family(&self.exec_prefix)
    }

    /// `@.` by default.
    pub fn listener_family(&self) -> String {
        self.family(&self.bind_prefix)
    }

    /// `pour.` by default.
    pub fn pour_family(&self) -> String {
        self.family(&self.pour_prefix)
    }

    /// `each.` by default.
    pub fn each_family(&self) -> String {
        self.family(&self.each_prefix)
    }
}

/// Strip `family` from `attribute`, returning the non-empty remainder.
pub(crate) fn strip_family<'a>(attribute: &'a str, family: &str) -> Option<&'a str> {
    attribute
        .strip_prefix(family)
        .filter(|rest| !rest.is_empty())
}
