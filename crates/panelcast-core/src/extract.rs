//! Text extraction from host payload values whose concrete shape is not
//! stable across host versions.
//!
//! A value is first rendered through `Display`. Renderings that look like an
//! object identity (`TypeName@1a2b3c`) are not text, so the accessor
//! strategies in [`STRATEGIES`] are tried in order. When none yields text the
//! caller's sentinel is returned. Extraction never fails.

use std::fmt::{self, Write as _};

use tracing::debug;

/// Returned for player names that cannot be resolved.
pub const UNKNOWN_NAME: &str = "Unknown";
/// Returned for chat bodies that cannot be resolved.
pub const UNAVAILABLE_MESSAGE: &str = "[unavailable]";

/// Why an accessor did not produce text.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("accessor not supported")]
    Unsupported,
    #[error("accessor failed: {0}")]
    Failed(String),
}

/// A payload field handed over by the host.
///
/// Accessors default to [`ProbeError::Unsupported`]; host wrappers override the
/// ones they actually expose.
pub trait PayloadValue: fmt::Display + Send + Sync {
    /// Set for values that are known to be plain text already.
    fn as_plain_text(&self) -> Option<&str> {
        None
    }

    /// The wrapped value, for boxed parameter types.
    fn underlying_value(&self) -> Result<Option<String>, ProbeError> {
        Err(ProbeError::Unsupported)
    }

    /// The raw string form, for message/formatted-text types.
    fn raw_string(&self) -> Result<Option<String>, ProbeError> {
        Err(ProbeError::Unsupported)
    }
}

impl PayloadValue for String {
    fn as_plain_text(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

impl PayloadValue for &str {
    fn as_plain_text(&self) -> Option<&str> {
        Some(*self)
    }
}

type Strategy = fn(&dyn PayloadValue) -> Result<Option<String>, ProbeError>;

/// Accessor strategies in fallback order.
pub const STRATEGIES: [(&str, Strategy); 2] = [
    ("underlying_value", probe_underlying_value),
    ("raw_string", probe_raw_string),
];

fn probe_underlying_value(value: &dyn PayloadValue) -> Result<Option<String>, ProbeError> {
    value.underlying_value()
}

fn probe_raw_string(value: &dyn PayloadValue) -> Result<Option<String>, ProbeError> {
    value.raw_string()
}

/// Resolve `value` to text, returning `sentinel` if nothing usable is found.
pub fn extract(value: &dyn PayloadValue, sentinel: &str) -> String {
    if let Some(text) = value.as_plain_text() {
        return text.to_owned();
    }

    // A failing `Display` is treated like an identity rendering.
    let mut rendered = String::new();
    let rendered_ok = write!(rendered, "{value}").is_ok();
    if rendered_ok && !looks_like_identity(&rendered) {
        return rendered;
    }

    for (name, strategy) in STRATEGIES {
        match strategy(value) {
            Ok(Some(text)) => return text,
            Ok(None) => debug!(strategy = name, rendered = %rendered, "accessor returned nothing"),
            Err(ProbeError::Unsupported) => {}
            Err(e) => debug!(strategy = name, rendered = %rendered, error = %e, "accessor failed"),
        }
    }

    debug!(rendered = %rendered, sentinel, "no accessor resolved payload value");
    sentinel.to_owned()
}

pub fn extract_name(value: &dyn PayloadValue) -> String {
    extract(value, UNKNOWN_NAME)
}

pub fn extract_message(value: &dyn PayloadValue) -> String {
    extract(value, UNAVAILABLE_MESSAGE)
}

/// `TypeName@1a2b3c`: a non-blank type name, `@`, then a short hex hash.
fn looks_like_identity(rendered: &str) -> bool {
    let Some((type_name, hash)) = rendered.rsplit_once('@') else {
        return false;
    };
    if type_name.is_empty() || type_name.chars().any(char::is_whitespace) {
        return false;
    }
    let hash = hash.strip_prefix("0x").unwrap_or(hash);
    !hash.is_empty() && hash.len() <= 16 && hash.chars().all(|c| c.is_ascii_hexdigit())
}
