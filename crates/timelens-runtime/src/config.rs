#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! [`RuntimeConfig`] is built from defaults, optionally overlaid with
//! environment variables via [`RuntimeConfig::from_env`], and then refined
//! with the `with_*` setters.
//!
//! | variable | values | field |
//! |---|---|---|
//! | `TIMELENS_DELIVERY` | `batched`, `immediate` | [`RuntimeConfig::delivery`] |
//! | `TIMELENS_ORIGIN` | any string | [`RuntimeConfig::default_origin`] |
//! | `TIMELENS_ISOLATE_PANICS` | `0`, `1`, `true`, `false` | [`RuntimeConfig::isolate_callback_panics`] |
//!
//! Unparseable values are ignored and the default is kept.

use std::env;

/// Environment variable selecting [`DeliveryMode`].
pub const ENV_DELIVERY: &str = "TIMELENS_DELIVERY";
/// Environment variable setting the default origin tag.
pub const ENV_ORIGIN: &str = "TIMELENS_ORIGIN";
/// Environment variable toggling callback panic isolation.
pub const ENV_ISOLATE_PANICS: &str = "TIMELENS_ISOLATE_PANICS";

/// How published changes reach observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Queue changes and deliver them once per tick, grouped by
    /// (target, property).
    #[default]
    Batched,
    /// Deliver each change synchronously, one callback invocation per change.
    Immediate,
}

impl DeliveryMode {
    /// Parse `batched` / `immediate` (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("batched") {
            Some(Self::Batched)
        } else if value.eq_ignore_ascii_case("immediate") {
            Some(Self::Immediate)
        } else {
            None
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Batched => "batched",
            Self::Immediate => "immediate",
        }
    }
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Change delivery mode.
    pub delivery: DeliveryMode,
    /// Origin tag attached to changes made outside any tagged read context.
    pub default_origin: Option<String>,
    /// Catch panics raised by observer callbacks so the rest of a flush is
    /// still delivered.
    pub isolate_callback_panics: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::Batched,
            default_origin: None,
            isolate_callback_panics: true,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with the `TIMELENS_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    #[must_use]
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_DELIVERY)
            && let Some(mode) = DeliveryMode::parse(&val)
        {
            self.delivery = mode;
        }
        if let Some(val) = lookup(ENV_ORIGIN) {
            let val = val.trim();
            self.default_origin = (!val.is_empty()).then(|| val.to_string());
        }
        if let Some(val) = lookup(ENV_ISOLATE_PANICS)
            && let Some(enabled) = parse_flag(&val)
        {
            self.isolate_callback_panics = enabled;
        }
        self
    }

    /// Set the delivery mode.
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Set the default origin tag.
    #[must_use]
    pub fn with_default_origin(mut self, origin: impl Into<String>) -> Self {
        self.default_origin = Some(origin.into());
        self
    }

    /// Toggle callback panic isolation.
    #[must_use]
    pub fn with_isolate_callback_panics(mut self, enabled: bool) -> Self {
        self.isolate_callback_panics = enabled;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
