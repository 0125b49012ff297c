//! Process-wide runtime configuration.
//!
//! Per the crate's concurrency model, a handful of knobs are shared by every
//! call into the library rather than threaded through each function: the
//! path to Apple's root certificate, the replay-protection time window, and
//! the session request timeout. These are read far more often than they are
//! set, so they live behind a [`OnceLock`] set once at process startup
//! instead of a mutable global.

use std::sync::OnceLock;
use std::time::Duration;

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Process-wide configuration read by every call that needs it.
///
/// Construct with [`RuntimeConfig::default`] and override fields, or load
/// from the environment with [`RuntimeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to Apple's root CA certificate (single PEM block, CA=true).
    pub apple_root_certificate_path: String,

    /// Maximum allowed gap between a token's `signingTime` and the
    /// transaction reference time before the token is rejected as a replay.
    pub transaction_time_window: Duration,

    /// Timeout for the outbound mTLS session-provisioning POST.
    pub session_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            apple_root_certificate_path: "AppleRootCA-G3.crt".to_string(),
            transaction_time_window: Duration::from_secs(5 * 60),
            session_timeout: Duration::from_secs(30),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from environment variables, falling back to
    /// [`RuntimeConfig::default`] values for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let apple_root_certificate_path = std::env::var("APPLE_ROOT_CERTIFICATE_PATH")
            .unwrap_or(defaults.apple_root_certificate_path);

        let transaction_time_window = std::env::var("TRANSACTION_TIME_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.transaction_time_window);

        let session_timeout = std::env::var("SESSION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_timeout);

        Self {
            apple_root_certificate_path,
            transaction_time_window,
            session_timeout,
        }
    }
}

/// Installs the process-wide configuration. Must be called, at most once,
/// before the first call into the library; subsequent calls are ignored.
///
/// Returns `false` if configuration had already been installed (either
/// explicitly or implicitly via [`runtime_config`] falling back to defaults).
pub fn configure(config: RuntimeConfig) -> bool {
    RUNTIME_CONFIG.set(config).is_ok()
}

/// Returns the process-wide configuration, installing [`RuntimeConfig::default`]
/// if [`configure`] was never called.
pub fn runtime_config() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get_or_init(RuntimeConfig::default)
}
