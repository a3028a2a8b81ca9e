//! Secret-masking log choke point.
//!
//! Every log line the crate emits, from bootstrap and transports down to value
//! decoding, goes through [`emit`] (usually via the [`secure_log!`](crate::secure_log) macro).
//! Context values whose key names a credential are replaced with [`MASK`], and
//! the configured password and key path are scrubbed from everything else by
//! the process-wide [`Redactor`].

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::Level;

/// Replacement text for masked values.
pub const MASK: &str = "***";

/// Key fragments that mark a context value as sensitive.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["password", "passwd", "key_path", "passphrase"];

/// Keys that are sensitive only when they match exactly.
const SENSITIVE_KEYS: &[&str] = &["secret", "token", "identity_file", "ssh_key"];

/// Scrubs known secret values out of free-form text.
///
/// Built once from the resolved connection settings. Driver and ssh error text
/// can echo back what it was given, so this runs over error messages as well as
/// log lines.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Arc<Vec<String>>,
}

impl Redactor {
    /// Create a redactor for the given secret values. Empty values are ignored.
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.is_empty())
            .collect();
        // Longest first so a secret containing another is replaced whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        secrets.dedup();
        Self {
            secrets: Arc::new(secrets),
        }
    }

    /// Replace every occurrence of a known secret with [`MASK`].
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in self.secrets.iter() {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        out
    }

    /// Number of secrets this redactor knows about.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

fn global_redactor() -> &'static RwLock<Redactor> {
    static REDACTOR: OnceLock<RwLock<Redactor>> = OnceLock::new();
    REDACTOR.get_or_init(|| RwLock::new(Redactor::default()))
}

/// Install the process-wide redactor used by [`emit`].
pub fn install_redactor(redactor: Redactor) {
    match global_redactor().write() {
        Ok(mut guard) => *guard = redactor,
        Err(poisoned) => *poisoned.into_inner() = redactor,
    }
}

/// Get a copy of the process-wide redactor.
pub fn redactor() -> Redactor {
    match global_redactor().read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Check whether a context key names a credential.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&lower.as_str())
        || SENSITIVE_KEY_FRAGMENTS
            .iter()
            .any(|fragment| lower.contains(fragment))
}

/// Mask sensitive keys and scrub secret values from a log context.
pub fn mask_context(context: &[(&str, String)], redactor: &Redactor) -> Vec<(String, String)> {
    context
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                MASK.to_string()
            } else {
                redactor.scrub(value)
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Render a context as `key=value` pairs, masking as it goes.
pub fn format_context(context: &[(&str, String)], redactor: &Redactor) -> String {
    let mut out = String::new();
    for (key, value) in mask_context(context, redactor) {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{}={}", key, value);
    }
    out
}

/// Emit one log event after masking.
///
/// This is the only place component log lines are handed to `tracing`.
pub fn emit(level: Level, message: &str, context: &[(&str, String)]) {
    let redactor = redactor();
    let message = redactor.scrub(message);
    let context = format_context(context, &redactor);

    match level {
        Level::ERROR => tracing::error!(context = %context, "{}", message),
        Level::WARN => tracing::warn!(context = %context, "{}", message),
        Level::INFO => tracing::info!(context = %context, "{}", message),
        Level::DEBUG => tracing::debug!(context = %context, "{}", message),
        Level::TRACE => tracing::trace!(context = %context, "{}", message),
    }
}

/// Log through the masking choke point.
///
/// ```ignore
/// secure_log!(info, "Opening connection", host = endpoint.host, port = endpoint.port);
/// ```
#[macro_export]
macro_rules! secure_log {
    ($level:ident, $msg:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::logging::emit(
            $crate::__secure_log_level!($level),
            &$msg,
            &[$((stringify!($key), ($value).to_string())),*],
        )
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __secure_log_level {
    (error) => {
        ::tracing::Level::ERROR
    };
    (warn) => {
        ::tracing::Level::WARN
    };
    (info) => {
        ::tracing::Level::INFO
    };
    (debug) => {
        ::tracing::Level::DEBUG
    };
    (trace) => {
        ::tracing::Level::TRACE
    };
}
