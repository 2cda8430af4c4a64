//! Per-instance provider configuration
//!
//! A [`ProviderInstanceConfig`] is one user-configured instance of a provider
//! type. Type-specific settings live in an open key/value map of
//! [`ConfigValue`]s whose shape is described by [`ConfigField`] descriptors.
//!
//! Records written by older releases used fixed named fields
//! (`keychainKey`, `organizationId`, `monthlyBudget`, `profileName`). Those are
//! folded into the generic map on decode when the map itself is absent.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Legacy fixed fields, in the order they are migrated.
pub const LEGACY_FIELDS: [&str; 4] = [
    "keychainKey",
    "organizationId",
    "monthlyBudget",
    "profileName",
];

/// Dynamically-typed configuration value
///
/// Decoding follows a fixed precedence: integer, then double, then bool, then
/// string. A JSON number with no fractional part (`3` or `3.0`) therefore
/// always becomes [`ConfigValue::Int`]. Strings are never coerced, so `"true"`
/// stays a string.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    #[default]
    Null,
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value; integers widen to doubles
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }

    /// Parse user input (CLI `key=value`) with the same precedence as decoding
    pub fn parse_input(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return ConfigValue::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return ConfigValue::Int(i);
        }
        if let Ok(d) = trimmed.parse::<f64>()
            && d.is_finite()
        {
            return ConfigValue::from_f64(d);
        }
        match trimmed {
            "true" => ConfigValue::Bool(true),
            "false" => ConfigValue::Bool(false),
            _ => ConfigValue::String(raw.to_string()),
        }
    }

    fn from_f64(d: f64) -> Self {
        if d.fract() == 0.0 && d >= i64::MIN as f64 && d <= i64::MAX as f64 {
            ConfigValue::Int(d as i64)
        } else {
            ConfigValue::Double(d)
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => write!(f, "{s}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Double(d) => write!(f, "{d}"),
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Int(i)
    }
}

impl From<f64> for ConfigValue {
    /// Whole numbers become [`ConfigValue::Int`], matching decoding
    fn from(d: f64) -> Self {
        ConfigValue::from_f64(d)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl Serialize for ConfigValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigValue::String(s) => serializer.serialize_str(s),
            ConfigValue::Int(i) => serializer.serialize_i64(*i),
            ConfigValue::Double(d) => serializer.serialize_f64(*d),
            ConfigValue::Bool(b) => serializer.serialize_bool(*b),
            ConfigValue::Null => serializer.serialize_unit(),
        }
    }
}

struct ConfigValueVisitor;

impl<'de> Visitor<'de> for ConfigValueVisitor {
    type Value = ConfigValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, number, bool, or null")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ConfigValue, E> {
        match i64::try_from(v) {
            Ok(i) => Ok(ConfigValue::Int(i)),
            Err(_) => Ok(ConfigValue::Double(v as f64)),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<ConfigValue, E> {
        Ok(ConfigValue::from_f64(v))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Bool(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ConfigValue, E> {
        Ok(ConfigValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<ConfigValue, E> {
        Ok(ConfigValue::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<ConfigValue, E> {
        Ok(ConfigValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<ConfigValue, D::Error> {
        d.deserialize_any(ConfigValueVisitor)
    }
}

impl<'de> Deserialize<'de> for ConfigValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ConfigValueVisitor)
    }
}

/// Type-specific settings of one instance
pub type ProviderConfigMap = BTreeMap<String, ConfigValue>;

/// A persisted, user-configured provider instance
///
/// Equality compares every field, `enabled` and the config map included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawInstanceConfig")]
pub struct ProviderInstanceConfig {
    /// Unique instance key
    pub id: String,
    /// Registry type this instance belongs to
    pub type_id: String,
    /// User-editable display name
    pub label: String,
    pub enabled: bool,
    /// Whether detection currently reports the tool as present
    pub is_auto_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub provider_config: ProviderConfigMap,
}

impl ProviderInstanceConfig {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            label: label.into(),
            enabled: false,
            is_auto_detected: false,
            sort_order: None,
            provider_config: ProviderConfigMap::new(),
        }
    }

    /// Builder: set enabled
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder: set auto-detected
    pub fn auto_detected(mut self, detected: bool) -> Self {
        self.is_auto_detected = detected;
        self
    }

    /// Builder: set one config entry
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.provider_config.insert(key.into(), value.into());
        self
    }

    pub fn value(&self, key: &str) -> Option<&ConfigValue> {
        self.provider_config.get(key).filter(|v| !v.is_null())
    }

    /// String value, ignoring empty strings
    pub fn string(&self, key: &str) -> Option<&str> {
        self.value(key)
            .and_then(ConfigValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(ConfigValue::as_i64)
    }

    pub fn double(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(ConfigValue::as_f64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(ConfigValue::as_bool)
    }

    /// Secret store key for a secret field: the configured reference, or
    /// `<id>.<field key>` when none is set
    pub fn secret_reference(&self, key: &str) -> String {
        self.string(key)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.{}", self.id, key))
    }
}

/// On-disk shape accepted when decoding, covering the legacy fixed fields
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstanceConfig {
    id: String,
    type_id: String,
    label: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    is_auto_detected: bool,
    #[serde(default)]
    sort_order: Option<i64>,
    #[serde(default)]
    provider_config: Option<ProviderConfigMap>,
    #[serde(default)]
    keychain_key: Option<ConfigValue>,
    #[serde(default)]
    organization_id: Option<ConfigValue>,
    #[serde(default)]
    monthly_budget: Option<ConfigValue>,
    #[serde(default)]
    profile_name: Option<ConfigValue>,
}

fn default_enabled() -> bool {
    true
}

impl From<RawInstanceConfig> for ProviderInstanceConfig {
    fn from(raw: RawInstanceConfig) -> Self {
        let provider_config = match raw.provider_config {
            Some(map) => map,
            None => {
                let legacy = [
                    raw.keychain_key,
                    raw.organization_id,
                    raw.monthly_budget,
                    raw.profile_name,
                ];
                LEGACY_FIELDS
                    .iter()
                    .zip(legacy)
                    .filter_map(|(key, value)| {
                        value
                            .filter(|v| !v.is_null())
                            .map(|v| (key.to_string(), v))
                    })
                    .collect()
            }
        };

        Self {
            id: raw.id,
            type_id: raw.type_id,
            label: raw.label,
            enabled: raw.enabled,
            is_auto_detected: raw.is_auto_detected,
            sort_order: raw.sort_order,
            provider_config,
        }
    }
}

/// Kind of a configurable field, driving form generation and secret handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldKind {
    Text,
    /// Value is a key into the secret store, never the secret itself
    Secret,
    Number,
    Toggle,
}

/// Descriptor of one configurable field of a provider type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigField {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: ConfigFieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<&'static str>,
    pub required: bool,
}

impl ConfigField {
    pub const fn text(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            kind: ConfigFieldKind::Text,
            placeholder: None,
            required: false,
        }
    }

    pub const fn secret(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            kind: ConfigFieldKind::Secret,
            placeholder: None,
            required: true,
        }
    }

    pub const fn number(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            kind: ConfigFieldKind::Number,
            placeholder: None,
            required: false,
        }
    }

    pub const fn toggle(key: &'static str, label: &'static str) -> Self {
        Self {
            key,
            label,
            kind: ConfigFieldKind::Toggle,
            placeholder: None,
            required: false,
        }
    }

    pub const fn with_placeholder(mut self, placeholder: &'static str) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_secret(&self) -> bool {
        self.kind == ConfigFieldKind::Secret
    }
}
