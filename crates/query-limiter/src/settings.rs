//! Process-wide limiter settings.
//!
//! Settings are meant to be set once while the test harness starts up, before
//! any scope is entered. The limiter can be disabled but never re-enabled for
//! the rest of the process.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

/// Environment variable that disables the limiter (`1`, `true`, `yes`, `on`).
pub const ENV_DISABLED: &str = "QUERY_LIMITER_DISABLED";

/// Environment variable listing default connection aliases, comma separated.
pub const ENV_DB_CONNECTIONS: &str = "QUERY_LIMITER_DB_CONNECTIONS";

/// Settings shared by every scope that does not pass its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    /// When set, scopes install nothing and no limit applies.
    pub disabled: bool,
    /// Connections watched by scopes that do not name any.
    pub default_db_connections: Option<Vec<String>>,
}

impl LimiterSettings {
    /// Create settings with defaults (enabled, no default connections).
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable (or enable) limiting.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Set the connections watched when a scope names none.
    pub fn with_default_db_connections<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_db_connections = Some(aliases.into_iter().map(Into::into).collect());
        self
    }

    /// Read settings from [`ENV_DISABLED`] and [`ENV_DB_CONNECTIONS`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, keyed like [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let disabled = lookup(ENV_DISABLED).is_some_and(|value| parse_flag(&value));
        let default_db_connections = lookup(ENV_DB_CONNECTIONS).and_then(|value| {
            let aliases: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|alias| !alias.is_empty())
                .map(str::to_string)
                .collect();
            (!aliases.is_empty()).then_some(aliases)
        });

        Self {
            disabled,
            default_db_connections,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

static SETTINGS: RwLock<LimiterSettings> = RwLock::new(LimiterSettings {
    disabled: false,
    default_db_connections: None,
});

/// Snapshot of the process-wide settings.
pub fn settings() -> LimiterSettings {
    SETTINGS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Disable all query limiting for the rest of the process.
///
/// Idempotent. Scopes entered afterwards install nothing.
pub fn disable_query_limiter() {
    SETTINGS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .disabled = true;
    tracing::debug!(target: "query_limiter", "query limiter disabled");
}

/// Replace the connections watched by scopes that name none.
pub fn set_default_db_connections<I, S>(aliases: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let aliases: Vec<String> = aliases.into_iter().map(Into::into).collect();
    tracing::debug!(target: "query_limiter", connections = ?aliases, "default connections set");
    SETTINGS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .default_db_connections = Some(aliases);
}

/// Apply [`LimiterSettings::from_env`] to the process-wide settings.
///
/// Only switches that are present take effect; an enabled flag does not undo
/// an earlier [`disable_query_limiter`].
pub fn init_from_env() {
    let env = LimiterSettings::from_env();
    if env.disabled {
        disable_query_limiter();
    }
    if let Some(aliases) = env.default_db_connections {
        set_default_db_connections(aliases);
    }
}
