//! Settings store and the manager construction protocol.
//!
//! Applications describe their tracing setup in a [`Settings`] store, and
//! [`build_tracing`] turns it into a [`RequestTracing`] manager once at
//! startup. Tracers and managers can be supplied as typed values; string
//! values naming a factory are resolved through a [`FactoryRegistry`] for
//! deployments whose configuration must round-trip through text. All
//! configuration problems fail here, never at request time.
//!
//! Boolean-like settings accept native booleans and the usual string
//! spellings; list-like settings accept lists and whitespace-delimited
//! strings, so values can come straight out of an ini-style file.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracekit::trace::Tracer;

use crate::tracing::{RequestTracing, StartSpanCallback};

/// Recognized settings keys.
pub mod keys {
    /// The constructed (or pre-built) manager. Written back by
    /// [`build_tracing`](super::build_tracing) so handlers can retrieve it.
    pub const TRACING: &str = "trace.tracing";
    /// Factory producing a complete manager from the settings.
    pub const TRACING_FACTORY: &str = "trace.tracing_factory";
    /// Factory producing a raw tracer, wrapped into a new manager.
    pub const TRACER_FACTORY: &str = "trace.tracer_factory";
    /// Free-form parameters a tracer factory may consume.
    pub const TRACER_PARAMETERS: &str = "trace.tracer_parameters";
    /// Deprecated: a directly supplied raw tracer.
    pub const BASE_TRACER: &str = "trace.base_tracer";
    /// Deprecated: alias of [`TRACER_FACTORY`].
    pub const BASE_TRACER_FACTORY: &str = "trace.base_tracer_factory";
    /// Whether every request is traced. Defaults to true.
    pub const TRACE_ALL: &str = "trace.trace_all";
    /// Request attribute names copied onto each span as tags.
    pub const TRACED_ATTRIBUTES: &str = "trace.traced_attributes";
    /// Callback invoked with every newly started span.
    pub const START_SPAN_CB: &str = "trace.start_span_cb";
}

/// Factory producing a tracer from the full settings store.
pub type TracerFactory =
    Arc<dyn Fn(&Settings) -> Result<Arc<dyn Tracer>, ConfigError> + Send + Sync>;

/// Factory producing a complete manager from the full settings store.
pub type TracingFactory =
    Arc<dyn Fn(&Settings) -> Result<Arc<RequestTracing>, ConfigError> + Send + Sync>;

/// A single settings value.
#[derive(Clone)]
#[non_exhaustive]
pub enum Setting {
    /// A native boolean.
    Bool(bool),
    /// A string, possibly naming a registered factory or spelling a
    /// boolean/list.
    Str(String),
    /// An ordered list of strings.
    List(Vec<String>),
    /// A tracer instance.
    Tracer(Arc<dyn Tracer>),
    /// A pre-built manager.
    Tracing(Arc<RequestTracing>),
    /// A tracer factory value.
    TracerFactory(TracerFactory),
    /// A manager factory value.
    TracingFactory(TracingFactory),
    /// A start-span callback.
    Callback(StartSpanCallback),
}

impl Setting {
    fn type_name(&self) -> &'static str {
        match self {
            Setting::Bool(_) => "a boolean",
            Setting::Str(_) => "a string",
            Setting::List(_) => "a list",
            Setting::Tracer(_) => "a tracer",
            Setting::Tracing(_) => "a tracing manager",
            Setting::TracerFactory(_) => "a tracer factory",
            Setting::TracingFactory(_) => "a tracing factory",
            Setting::Callback(_) => "a callback",
        }
    }
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Setting::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Setting::List(v) => f.debug_tuple("List").field(v).finish(),
            other => f.write_str(other.type_name()),
        }
    }
}

impl From<bool> for Setting {
    fn from(value: bool) -> Self {
        Setting::Bool(value)
    }
}

impl From<&str> for Setting {
    fn from(value: &str) -> Self {
        Setting::Str(value.to_string())
    }
}

impl From<String> for Setting {
    fn from(value: String) -> Self {
        Setting::Str(value)
    }
}

impl From<Vec<String>> for Setting {
    fn from(value: Vec<String>) -> Self {
        Setting::List(value)
    }
}

impl From<Arc<dyn Tracer>> for Setting {
    fn from(value: Arc<dyn Tracer>) -> Self {
        Setting::Tracer(value)
    }
}

impl From<Arc<RequestTracing>> for Setting {
    fn from(value: Arc<RequestTracing>) -> Self {
        Setting::Tracing(value)
    }
}

/// String-keyed configuration store, the host application's settings
/// surface for this adapter.
#[derive(Debug, Default)]
pub struct Settings(HashMap<String, Setting>);

impl Settings {
    /// An empty store.
    pub fn new() -> Self {
        Settings::default()
    }

    /// Set a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Setting>) {
        self.0.insert(key.into(), value.into());
    }

    /// Read a value.
    pub fn get(&self, key: &str) -> Option<&Setting> {
        self.0.get(key)
    }

    /// The published manager, if [`build_tracing`] has run (or one was
    /// supplied directly).
    pub fn tracing(&self) -> Option<Arc<RequestTracing>> {
        match self.get(keys::TRACING) {
            Some(Setting::Tracing(tracing)) => Some(tracing.clone()),
            _ => None,
        }
    }
}

/// Errors detected while interpreting settings.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A settings value has an unusable type.
    #[error("setting `{key}` expects {expected}, found {found}")]
    UnexpectedType {
        /// The offending key.
        key: String,
        /// What the key accepts.
        expected: &'static str,
        /// What was found.
        found: &'static str,
    },

    /// A string value does not spell a boolean.
    #[error("setting `{key}` is not a valid boolean: `{value}`")]
    InvalidBool {
        /// The offending key.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// A string value names a factory the registry does not know.
    #[error("no factory registered under name `{0}`")]
    UnknownFactory(String),

    /// A factory refused the settings it was given.
    #[error("factory failed: {0}")]
    Factory(String),
}

/// Coerce a boolean-like setting.
///
/// Accepts native booleans and the string spellings `true/t/yes/y/on/1`
/// and `false/f/no/n/off/0` (case insensitive; the empty string is
/// false).
pub fn as_bool(key: &str, setting: &Setting) -> Result<bool, ConfigError> {
    match setting {
        Setting::Bool(value) => Ok(*value),
        Setting::Str(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "off" | "0" | "" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.clone(),
            }),
        },
        other => Err(ConfigError::UnexpectedType {
            key: key.to_string(),
            expected: "a boolean",
            found: other.type_name(),
        }),
    }
}

/// Coerce a list-like setting.
///
/// Accepts native lists and whitespace/newline-delimited strings.
pub fn as_list(key: &str, setting: &Setting) -> Result<Vec<String>, ConfigError> {
    match setting {
        Setting::List(values) => Ok(values.clone()),
        Setting::Str(value) => Ok(value.split_whitespace().map(str::to_string).collect()),
        other => Err(ConfigError::UnexpectedType {
            key: key.to_string(),
            expected: "a list",
            found: other.type_name(),
        }),
    }
}

/// Named factories for text-serialized configurations.
///
/// Resolution happens once, inside [`build_tracing`]; an unknown name is
/// a construction-time error. Typed factory values in the settings skip
/// the registry entirely.
#[derive(Default)]
pub struct FactoryRegistry {
    tracers: HashMap<String, TracerFactory>,
    tracings: HashMap<String, TracingFactory>,
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("tracers", &self.tracers.keys())
            .field("tracings", &self.tracings.keys())
            .finish()
    }
}

impl FactoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        FactoryRegistry::default()
    }

    /// Register a tracer factory under a name.
    pub fn register_tracer(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Settings) -> Result<Arc<dyn Tracer>, ConfigError> + Send + Sync + 'static,
    ) {
        self.tracers.insert(name.into(), Arc::new(factory));
    }

    /// Register a manager factory under a name.
    pub fn register_tracing(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Settings) -> Result<Arc<RequestTracing>, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.tracings.insert(name.into(), Arc::new(factory));
    }
}

/// Construct the manager described by the settings and publish it back
/// into the store under [`keys::TRACING`].
///
/// Sources are tried in priority order, first match wins:
/// 1. a pre-built manager under `trace.tracing`;
/// 2. a tracing factory (value or registered name);
/// 3. a tracer factory (value or registered name), wrapped in a new
///    manager;
/// 4. deprecated: a direct `trace.base_tracer` or
///    `trace.base_tracer_factory`;
/// 5. a manager around the process-wide global tracer.
///
/// `trace.start_span_cb` and `trace.trace_all` (default true) are then
/// applied onto the result.
pub fn build_tracing(
    settings: &mut Settings,
    registry: &FactoryRegistry,
) -> Result<Arc<RequestTracing>, ConfigError> {
    let tracing = construct(settings, registry)?;

    if let Some(setting) = settings.get(keys::START_SPAN_CB) {
        match setting {
            Setting::Callback(cb) => tracing.set_start_span_cb(cb.clone()),
            other => {
                return Err(ConfigError::UnexpectedType {
                    key: keys::START_SPAN_CB.to_string(),
                    expected: "a callback",
                    found: other.type_name(),
                })
            }
        }
    }

    let trace_all = match settings.get(keys::TRACE_ALL) {
        Some(setting) => as_bool(keys::TRACE_ALL, setting)?,
        None => true,
    };
    tracing.set_trace_all(trace_all);

    settings.insert(keys::TRACING, Setting::Tracing(tracing.clone()));
    Ok(tracing)
}

fn construct(
    settings: &Settings,
    registry: &FactoryRegistry,
) -> Result<Arc<RequestTracing>, ConfigError> {
    if let Some(setting) = settings.get(keys::TRACING) {
        return match setting {
            Setting::Tracing(tracing) => Ok(tracing.clone()),
            other => Err(unexpected(keys::TRACING, "a tracing manager", other)),
        };
    }

    if let Some(setting) = settings.get(keys::TRACING_FACTORY) {
        let factory = match setting {
            Setting::TracingFactory(factory) => factory.clone(),
            Setting::Str(name) => registry
                .tracings
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownFactory(name.clone()))?,
            other => return Err(unexpected(keys::TRACING_FACTORY, "a tracing factory", other)),
        };
        return factory(settings);
    }

    if let Some(setting) = settings.get(keys::TRACER_FACTORY) {
        let factory = resolve_tracer_factory(keys::TRACER_FACTORY, setting, registry)?;
        let tracer = factory(settings)?;
        return Ok(Arc::new(RequestTracing::with_tracer(tracer)));
    }

    if let Some(setting) = settings.get(keys::BASE_TRACER) {
        tracing::warn!(
            key = keys::BASE_TRACER,
            "deprecated setting, use `trace.tracer_factory`"
        );
        return match setting {
            Setting::Tracer(tracer) => Ok(Arc::new(RequestTracing::with_tracer(tracer.clone()))),
            other => Err(unexpected(keys::BASE_TRACER, "a tracer", other)),
        };
    }

    if let Some(setting) = settings.get(keys::BASE_TRACER_FACTORY) {
        tracing::warn!(
            key = keys::BASE_TRACER_FACTORY,
            "deprecated setting, use `trace.tracer_factory`"
        );
        let factory = resolve_tracer_factory(keys::BASE_TRACER_FACTORY, setting, registry)?;
        let tracer = factory(settings)?;
        return Ok(Arc::new(RequestTracing::with_tracer(tracer)));
    }

    Ok(Arc::new(RequestTracing::new()))
}

fn resolve_tracer_factory(
    key: &str,
    setting: &Setting,
    registry: &FactoryRegistry,
) -> Result<TracerFactory, ConfigError> {
    match setting {
        Setting::TracerFactory(factory) => Ok(factory.clone()),
        Setting::Str(name) => registry
            .tracers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownFactory(name.clone())),
        other => Err(unexpected(key, "a tracer factory", other)),
    }
}

fn unexpected(key: &str, expected: &'static str, found: &Setting) -> ConfigError {
    ConfigError::UnexpectedType {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracing::RequestHead;
    use tracekit::testing::TestTracer;
    use tracekit::trace::Span;

    fn bool_setting(s: &str) -> Result<bool, ConfigError> {
        as_bool("k", &Setting::from(s))
    }

    #[test]
    fn as_bool_spellings() {
        for truthy in ["true", "TRUE", "t", "yes", "Y", "on", "1", " true "] {
            assert!(bool_setting(truthy).unwrap(), "{truthy}");
        }
        for falsy in ["false", "False", "f", "no", "n", "off", "0", ""] {
            assert!(!bool_setting(falsy).unwrap(), "{falsy}");
        }
        assert!(matches!(
            bool_setting("maybe"),
            Err(ConfigError::InvalidBool { .. })
        ));
        assert!(as_bool("k", &Setting::Bool(true)).unwrap());
        assert!(matches!(
            as_bool("k", &Setting::List(vec![])),
            Err(ConfigError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn as_list_forms() {
        assert_eq!(
            as_list("k", &Setting::from("path method\nhost")).unwrap(),
            vec!["path", "method", "host"]
        );
        assert_eq!(
            as_list("k", &Setting::List(vec!["path".into()])).unwrap(),
            vec!["path"]
        );
        assert!(matches!(
            as_list("k", &Setting::Bool(true)),
            Err(ConfigError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn default_build_publishes_manager() {
        let mut settings = Settings::new();
        let tracing = build_tracing(&mut settings, &FactoryRegistry::new()).unwrap();

        assert!(tracing.trace_all());
        assert!(Arc::ptr_eq(&settings.tracing().unwrap(), &tracing));
    }

    #[test]
    fn prebuilt_manager_wins() {
        let prebuilt = Arc::new(RequestTracing::new());
        let mut settings = Settings::new();
        settings.insert(keys::TRACING, prebuilt.clone());
        // Lower-priority sources present but ignored.
        settings.insert(
            keys::BASE_TRACER,
            Setting::Tracer(Arc::new(TestTracer::new())),
        );

        let tracing = build_tracing(&mut settings, &FactoryRegistry::new()).unwrap();
        assert!(Arc::ptr_eq(&tracing, &prebuilt));
    }

    #[test]
    fn tracing_factory_by_value() {
        let built = Arc::new(RequestTracing::new());
        let result = built.clone();
        let mut settings = Settings::new();
        settings.insert(
            keys::TRACING_FACTORY,
            Setting::TracingFactory(Arc::new(move |_settings| Ok(result.clone()))),
        );

        let tracing = build_tracing(&mut settings, &FactoryRegistry::new()).unwrap();
        assert!(Arc::ptr_eq(&tracing, &built));
    }

    #[test]
    fn tracer_factory_by_name_receives_settings() {
        let tracer = TestTracer::new();
        let mut registry = FactoryRegistry::new();
        let produced = tracer.clone();
        registry.register_tracer("test_tracer", move |settings| {
            match settings.get(keys::TRACER_PARAMETERS) {
                Some(Setting::Str(component)) if component == "MyComponent" => {
                    Ok(Arc::new(produced.clone()))
                }
                _ => Err(ConfigError::Factory("missing component name".into())),
            }
        });

        let mut settings = Settings::new();
        settings.insert(keys::TRACER_FACTORY, "test_tracer");
        settings.insert(keys::TRACER_PARAMETERS, "MyComponent");

        let tracing = build_tracing(&mut settings, &registry).unwrap();

        let mut req = http::Request::builder().body(()).unwrap();
        tracing.open(&mut req, &[]).unwrap();
        assert_eq!(tracer.span_count(), 1);
    }

    #[test]
    fn unknown_factory_name_fails_fast() {
        let mut settings = Settings::new();
        settings.insert(keys::TRACER_FACTORY, "nope");

        assert!(matches!(
            build_tracing(&mut settings, &FactoryRegistry::new()),
            Err(ConfigError::UnknownFactory(name)) if name == "nope"
        ));
    }

    #[test]
    fn deprecated_base_tracer_still_works() {
        let tracer = TestTracer::new();
        let mut settings = Settings::new();
        settings.insert(
            keys::BASE_TRACER,
            Setting::Tracer(Arc::new(tracer.clone())),
        );

        let tracing = build_tracing(&mut settings, &FactoryRegistry::new()).unwrap();
        let mut req = http::Request::builder().body(()).unwrap();
        tracing.open(&mut req, &[]).unwrap();
        assert_eq!(tracer.span_count(), 1);
    }

    #[test]
    fn trace_all_accepts_string_forms() {
        for (value, expected) in [("false", false), ("True", true)] {
            let mut settings = Settings::new();
            settings.insert(keys::TRACE_ALL, value);
            let tracing = build_tracing(&mut settings, &FactoryRegistry::new()).unwrap();
            assert_eq!(tracing.trace_all(), expected, "{value}");
        }
    }

    #[test]
    fn miswired_callback_is_a_construction_error() {
        let mut settings = Settings::new();
        settings.insert(keys::START_SPAN_CB, "not a callback");

        assert!(matches!(
            build_tracing(&mut settings, &FactoryRegistry::new()),
            Err(ConfigError::UnexpectedType { key, .. }) if key == keys::START_SPAN_CB
        ));
    }

    #[test]
    fn start_span_cb_from_settings_is_applied() {
        let tracer = TestTracer::new();
        let mut settings = Settings::new();
        settings.insert(
            keys::BASE_TRACER,
            Setting::Tracer(Arc::new(tracer.clone())),
        );
        settings.insert(
            keys::START_SPAN_CB,
            Setting::Callback(Arc::new(
                |span: &mut dyn Span, _head: &RequestHead<'_>| {
                    span.set_operation_name("testing_name".into())
                },
            )),
        );

        let tracing = build_tracing(&mut settings, &FactoryRegistry::new()).unwrap();
        let mut req = http::Request::builder().body(()).unwrap();
        tracing.open(&mut req, &[]).unwrap();
        assert_eq!(tracer.spans()[0].operation_name, "testing_name");
    }
}
