//! Verification engine configuration
//!
//! Values come from the host application. `from_env` mirrors the
//! environment overrides the server reads at startup; anything unset or
//! unparsable falls back to the default.

use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{CheckCategory, PenaltyAction};

/// Per-category number of checks drawn into each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CategoryQuotas {
    pub inject: u16,
    pub lua: u16,
    pub modded: u16,
}

impl Default for CategoryQuotas {
    fn default() -> Self {
        Self {
            inject: 9,
            lua: 1,
            modded: 1,
        }
    }
}

impl CategoryQuotas {
    pub fn for_category(&self, category: CheckCategory) -> u16 {
        match category {
            CheckCategory::Inject => self.inject,
            CheckCategory::Lua => self.lua,
            CheckCategory::Modded => self.modded,
        }
    }
}

/// Engine-wide settings shared read-only by every session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Master switch. Disabled means an empty catalog and no check cycles.
    pub enabled: bool,
    pub quotas: CategoryQuotas,
    /// Action for handshake failures, checksum mismatches and checks
    /// without an override.
    pub default_action: PenaltyAction,
    /// Longest a check batch may stay unanswered. Zero disables the limit.
    #[serde(with = "secs")]
    pub max_response_delay: Duration,
    /// Pause between the end of one cycle and the next batch.
    #[serde(with = "secs")]
    pub check_holdoff: Duration,
    #[serde(with = "secs")]
    pub ban_duration: Duration,
    /// Lua checks only run while the session has a player in the world.
    pub lua_requires_player: bool,
    /// Upper bound on the encoded size of the pooled checks in one batch.
    pub batch_budget: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quotas: CategoryQuotas::default(),
            default_action: PenaltyAction::Log,
            max_response_delay: Duration::from_secs(600),
            check_holdoff: Duration::from_secs(30),
            ban_duration: Duration::from_secs(86_400),
            lua_requires_player: true,
            batch_budget: 450,
        }
    }
}

impl VerifierConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = !env_flag("WARDEN_DISABLED").unwrap_or(!defaults.enabled);
        let quotas = CategoryQuotas {
            inject: env_parse("WARDEN_NUM_INJECT_CHECKS").unwrap_or(defaults.quotas.inject),
            lua: env_parse("WARDEN_NUM_LUA_CHECKS").unwrap_or(defaults.quotas.lua),
            modded: env_parse("WARDEN_NUM_MODDED_CHECKS").unwrap_or(defaults.quotas.modded),
        };
        let default_action = env_parse::<u8>("WARDEN_FAIL_ACTION")
            .and_then(|raw| PenaltyAction::try_from(raw).ok())
            .unwrap_or(defaults.default_action);

        Self {
            enabled,
            quotas,
            default_action,
            max_response_delay: env_parse("WARDEN_RESPONSE_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_response_delay),
            check_holdoff: env_parse("WARDEN_CHECK_HOLDOFF_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.check_holdoff),
            ban_duration: env_parse("WARDEN_BAN_DURATION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.ban_duration),
            lua_requires_player: !env_flag("WARDEN_LUA_WITHOUT_PLAYER")
                .unwrap_or(!defaults.lua_requires_player),
            batch_budget: env_parse("WARDEN_BATCH_BUDGET").unwrap_or(defaults.batch_budget),
        }
    }

    /// Delay before the next batch; never below one second.
    pub fn holdoff(&self) -> Duration {
        self.check_holdoff.max(Duration::from_secs(1))
    }

    /// Whether `category` contributes checks for a session in this state.
    pub fn category_active(&self, category: CheckCategory, has_player: bool) -> bool {
        if self.quotas.for_category(category) == 0 {
            return false;
        }
        !(category == CheckCategory::Lua && self.lua_requires_player && !has_player)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// Boolean switch. Unrecognized values fall back to the default.
fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().as_deref().and_then(parse_flag)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert!(config.enabled);
        assert_eq!(config.quotas.inject, 9);
        assert_eq!(config.default_action, PenaltyAction::Log);
        assert_eq!(config.batch_budget, 450);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("false"), Some(false));
        assert_eq!(parse_flag(""), None);
        assert_eq!(parse_flag("maybe"), None);
    }

    // Only test in the crate that touches the process environment.
    #[test]
    fn test_from_env_flags_are_values() {
        std::env::set_var("WARDEN_DISABLED", "0");
        std::env::set_var("WARDEN_LUA_WITHOUT_PLAYER", "false");
        let config = VerifierConfig::from_env();
        assert!(config.enabled);
        assert!(config.lua_requires_player);

        std::env::set_var("WARDEN_DISABLED", "1");
        std::env::set_var("WARDEN_LUA_WITHOUT_PLAYER", "yes");
        let config = VerifierConfig::from_env();
        assert!(!config.enabled);
        assert!(!config.lua_requires_player);

        std::env::remove_var("WARDEN_DISABLED");
        std::env::remove_var("WARDEN_LUA_WITHOUT_PLAYER");
        let config = VerifierConfig::from_env();
        assert!(config.enabled);
        assert!(config.lua_requires_player);
    }

    #[test]
    fn test_holdoff_floor() {
        let config = VerifierConfig {
            check_holdoff: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.holdoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_lua_gated_on_player() {
        let config = VerifierConfig::default();
        assert!(!config.category_active(CheckCategory::Lua, false));
        assert!(config.category_active(CheckCategory::Lua, true));
        assert!(config.category_active(CheckCategory::Inject, false));

        let relaxed = VerifierConfig {
            lua_requires_player: false,
            ..Default::default()
        };
        assert!(relaxed.category_active(CheckCategory::Lua, false));
    }

    #[test]
    fn test_zero_quota_inactive() {
        let config = VerifierConfig {
            quotas: CategoryQuotas {
                modded: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!config.category_active(CheckCategory::Modded, true));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: VerifierConfig = serde_json::from_str(
            r#"{ "default_action": "Kick", "check_holdoff": 5, "quotas": { "lua": 0 } }"#,
        )
        .unwrap();
        assert_eq!(config.default_action, PenaltyAction::Kick);
        assert_eq!(config.check_holdoff, Duration::from_secs(5));
        assert_eq!(config.quotas.lua, 0);
        assert_eq!(config.quotas.inject, 9);
        assert_eq!(config.max_response_delay, Duration::from_secs(600));
    }
}
