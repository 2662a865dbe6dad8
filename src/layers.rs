//! Configuration resolver: merge base, component-type and instance layers.
//!
//! A [`ConfigLayer`] is a partial configuration expressed as a JSON object.
//! The merge is purely structural:
//!
//! - a key that is **absent** from a layer is unset and never overrides
//! - a key present with JSON `null` is an explicit override to null
//! - two objects merge recursively, key by key
//! - everything else (arrays, scalars, object-vs-scalar mismatches) is
//!   replaced wholesale by the most specific layer that defines it
//!
//! [`resolve`] runs the merge over a serialised [`ResolvedConfig`] and then
//! deserialises the result back into the typed config, so no unset field can
//! reach the pipeline.

use crate::config::ResolvedConfig;
use crate::error::RenderError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A partial configuration. Absent keys are unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigLayer(Map<String, Value>);

impl ConfigLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a layer from JSON text. The top level must be an object.
    pub fn from_json(text: &str) -> Result<Self, RenderError> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            RenderError::InvalidConfiguration(format!("config layer is not valid JSON: {e}"))
        })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, RenderError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RenderError::InvalidConfiguration(format!(
                "config layer must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Set a value at a dotted path, creating intermediate objects.
    ///
    /// ```rust
    /// use tex2svg::ConfigLayer;
    ///
    /// let layer = ConfigLayer::new()
    ///     .set("engine", "xelatex")
    ///     .set("converter.exact_bbox", true);
    /// assert_eq!(layer.get("converter.exact_bbox"), Some(&true.into()));
    /// ```
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
        insert_path(&mut self.0, &parts, value.into());
        self
    }

    /// Value at a dotted path, if the layer defines it.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.').filter(|p| !p.is_empty());
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Return a copy of `self` with `overlay` merged on top.
    pub fn overlaid(&self, overlay: &ConfigLayer) -> ConfigLayer {
        let mut merged = self.0.clone();
        merge_object(&mut merged, &overlay.0);
        ConfigLayer(merged)
    }
}

impl From<Map<String, Value>> for ConfigLayer {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ── Merge ────────────────────────────────────────────────────────────────

/// Merge `overlay` into `target` in place.
pub fn merge_object(target: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(patch)) => merge_object(existing, patch),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge layers from least to most specific.
pub fn merge_layers(layers: &[&ConfigLayer]) -> Map<String, Value> {
    let mut merged = Map::new();
    for layer in layers {
        merge_object(&mut merged, &layer.0);
    }
    merged
}

/// Merge `component` then `instance` over `base` and produce a typed config.
///
/// Fails with [`RenderError::InvalidConfiguration`] when a layer names an
/// unknown key or a value of the wrong type, or when the merged config does
/// not pass [`ResolvedConfig::validate`].
pub fn resolve(
    base: &ResolvedConfig,
    component: &ConfigLayer,
    instance: &ConfigLayer,
) -> Result<ResolvedConfig, RenderError> {
    if component.is_empty() && instance.is_empty() {
        base.validate()?;
        return Ok(base.clone());
    }

    let base_value = serde_json::to_value(base)
        .map_err(|e| RenderError::Internal(format!("failed to serialise base config: {e}")))?;
    let Value::Object(mut merged) = base_value else {
        return Err(RenderError::Internal(
            "base config did not serialise to an object".into(),
        ));
    };

    merge_object(&mut merged, component.as_map());
    merge_object(&mut merged, instance.as_map());

    let resolved: ResolvedConfig = serde_json::from_value(Value::Object(merged))
        .map_err(|e| RenderError::InvalidConfiguration(format!("merged config rejected: {e}")))?;
    resolved.validate()?;
    Ok(resolved)
}

// ── Component layers ─────────────────────────────────────────────────────

/// Component kind used when a request does not name one.
pub const DEFAULT_KIND: &str = "math";

/// Per-component-type layers, keyed by kind (`math`, `tikz`, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentLayers {
    layers: HashMap<String, ConfigLayer>,
}

impl ComponentLayers {
    /// An empty set: every kind resolves against the base config alone.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in layers for the common snippet kinds.
    ///
    /// - `math`: `standalone` in `preview` mode with amsmath/amssymb
    /// - `tikz`: `standalone` with its `tikz` option
    /// - `document`: the source is a complete document and is not wrapped
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.insert(
            "math",
            ConfigLayer::new()
                .set("document.class_options", vec!["preview"])
                .set(
                    "document.preamble",
                    vec!["\\usepackage{amsmath}", "\\usepackage{amssymb}"],
                ),
        );
        set.insert(
            "tikz",
            ConfigLayer::new().set("document.class_options", vec!["tikz"]),
        );
        set.insert("document", ConfigLayer::new().set("document.wrap", false));
        set
    }

    /// Register or replace the layer for `kind`.
    pub fn insert(&mut self, kind: impl Into<String>, layer: ConfigLayer) {
        self.layers.insert(kind.into(), layer);
    }

    /// Merge `layer` over whatever is registered for `kind`.
    pub fn extend(&mut self, kind: impl Into<String>, layer: &ConfigLayer) {
        let entry = self.layers.entry(kind.into()).or_default();
        *entry = entry.overlaid(layer);
    }

    pub fn get(&self, kind: &str) -> Option<&ConfigLayer> {
        self.layers.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
