//! Structured logging and log hygiene.
//!
//! - [`init_logging`]: one-time `tracing` setup with `RUST_LOG` support
//! - [`redact_secrets`]: strips the Steam API key from text before it is logged

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Target for per-account failures (fetches, badge lookups, cache writes).
///
/// These are logged at warn and stay visible at every verbosity.
pub const FAILURES: &str = "steam_degrees::failures";

/// Log volume. Never changes behaviour, only what is printed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Filter directive used when `RUST_LOG` is not set.
    pub fn directive(&self) -> String {
        match self {
            Self::Error => format!("steam_degrees=error,{FAILURES}=warn"),
            _ => format!("steam_degrees={}", self.as_str()),
        }
    }
}

/// Initialize structured logging.
///
/// `RUST_LOG` takes precedence; otherwise [`Verbosity::directive`].
/// Subsequent calls are silently ignored by `tracing_subscriber`.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    // try_init so double-init in tests doesn't panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)([?&]key=)[^&\s)]+", "${1}***REDACTED***"),
            (
                r#"(?i)(steam_api_key|api[_-]?key)\s*[:=]\s*['"]?[a-zA-Z0-9]{16,}['"]?"#,
                "$1=***REDACTED***",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

/// Redact API keys from text.
///
/// `reqwest` errors embed the full request URL, which carries `key=...`.
pub fn redact_secrets(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in secret_patterns() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn redacts_key_query_parameter() {
        let text = "error sending request for url (https://api.steampowered.com/ISteamUser/GetFriendList/v1?key=ABCDEF0123456789&steamid=1)";
        let redacted = redact_secrets(text);
        assert!(!redacted.contains("ABCDEF0123456789"));
        assert!(redacted.contains("key=***REDACTED***"));
        assert!(redacted.contains("steamid=1"));
    }

    #[test]
    fn redacts_env_style_assignment() {
        let redacted = redact_secrets("STEAM_API_KEY=ABCDEF0123456789ABCDEF");
        assert!(!redacted.contains("ABCDEF0123456789ABCDEF"));
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        assert_eq!(redact_secrets("level 2 expanded"), "level 2 expanded");
    }

    #[test]
    fn verbosity_directive_targets_crate() {
        assert_eq!(Verbosity::Debug.directive(), "steam_degrees=debug");
        assert_eq!(Verbosity::default(), Verbosity::Info);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(verbosity: Verbosity, emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(verbosity.directive()))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn failures_survive_error_verbosity() {
        let text = capture(Verbosity::Error, || {
            tracing::warn!(target: FAILURES, "friend list for 7 failed");
            tracing::warn!("routine warning");
            tracing::info!(target: FAILURES, "retrying");
        });
        assert!(text.contains("friend list for 7 failed"));
        assert!(!text.contains("routine warning"));
        assert!(!text.contains("retrying"));
    }

    #[test]
    fn error_directive_keeps_failure_warnings() {
        assert_eq!(
            Verbosity::Error.directive(),
            "steam_degrees=error,steam_degrees::failures=warn"
        );
    }

    #[test]
    fn init_logging_twice_does_not_panic() {
        init_logging(Verbosity::Warn);
        init_logging(Verbosity::Debug);
    }
}
