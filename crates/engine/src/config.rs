//! Engine configuration via `ferrule.toml`
//!
//! On first open a default `ferrule.toml` is created in the data directory.
//! To change settings, edit the file and reopen the service.

use crate::registry::DropPolicy;
use ferrule_core::{Error, Language, Result};
use ferrule_sandbox::SandboxLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "ferrule.toml";

/// Sandbox limits, persisted under `[sandbox]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    /// Wall-clock budget per invocation in milliseconds (default: 1000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Memory cap per Lua state or Wasm store in MiB (default: 16)
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
    /// Lua instructions between deadline checks (default: 1000)
    #[serde(default = "default_lua_hook_interval")]
    pub lua_hook_interval: u32,
    /// Wasm fuel per invocation (default: 500000000)
    #[serde(default = "default_wasm_fuel")]
    pub wasm_fuel: u64,
    /// Wasm epoch tick in milliseconds (default: 10)
    #[serde(default = "default_wasm_epoch_tick_ms")]
    pub wasm_epoch_tick_ms: u64,
    /// Extra call prefixes rejected by the verifier for every language
    #[serde(default)]
    pub disallowed_prefixes: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_memory_limit_mb() -> usize {
    16
}

fn default_lua_hook_interval() -> u32 {
    1000
}

fn default_wasm_fuel() -> u64 {
    500_000_000
}

fn default_wasm_epoch_tick_ms() -> u64 {
    10
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
            lua_hook_interval: default_lua_hook_interval(),
            wasm_fuel: default_wasm_fuel(),
            wasm_epoch_tick_ms: default_wasm_epoch_tick_ms(),
            disallowed_prefixes: Vec::new(),
        }
    }
}

/// Engine configuration loaded from `ferrule.toml`.
///
/// # Example
///
/// ```toml
/// languages = ["lua", "wasm"]
/// drop_policy = "reject"
/// permissions_validity_ms = 0
///
/// [sandbox]
/// timeout_ms = 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Enabled function languages
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    /// Dropping a function used by an aggregate: `"reject"` or `"cascade"`
    #[serde(default = "default_drop_policy")]
    pub drop_policy: String,
    /// How long a cached permission decision stays valid, in milliseconds;
    /// 0 checks the grant table on every call (default)
    #[serde(default = "default_permissions_validity_ms")]
    pub permissions_validity_ms: u64,
    /// Sandbox limits
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

fn default_languages() -> Vec<String> {
    vec!["lua".to_string(), "wasm".to_string()]
}

fn default_drop_policy() -> String {
    "reject".to_string()
}

fn default_permissions_validity_ms() -> u64 {
    0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            drop_policy: default_drop_policy(),
            permissions_validity_ms: default_permissions_validity_ms(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse the language list.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown languages or an empty list.
    pub fn languages(&self) -> Result<Vec<Language>> {
        if self.languages.is_empty() {
            return Err(Error::Config(
                "At least one language must be enabled in ferrule.toml".to_string(),
            ));
        }
        let mut out = Vec::with_capacity(self.languages.len());
        for name in &self.languages {
            let language: Language = name.parse()?;
            if !out.contains(&language) {
                out.push(language);
            }
        }
        Ok(out)
    }

    /// Parse the drop policy string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"reject"` or `"cascade"`.
    pub fn drop_policy(&self) -> Result<DropPolicy> {
        match self.drop_policy.as_str() {
            "reject" => Ok(DropPolicy::Reject),
            "cascade" => Ok(DropPolicy::Cascade),
            other => Err(Error::Config(format!(
                "Invalid drop policy '{}' in ferrule.toml. Expected \"reject\" or \"cascade\".",
                other
            ))),
        }
    }

    /// Validity window of the permission cache.
    pub fn permissions_validity(&self) -> Duration {
        Duration::from_millis(self.permissions_validity_ms)
    }

    /// Build sandbox limits.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit is zero.
    pub fn sandbox_limits(&self) -> Result<SandboxLimits> {
        let s = &self.sandbox;
        for (name, value) in [
            ("timeout_ms", s.timeout_ms),
            ("memory_limit_mb", s.memory_limit_mb as u64),
            ("lua_hook_interval", s.lua_hook_interval as u64),
            ("wasm_fuel", s.wasm_fuel),
            ("wasm_epoch_tick_ms", s.wasm_epoch_tick_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!(
                    "sandbox.{} must be greater than zero in ferrule.toml",
                    name
                )));
            }
        }
        Ok(SandboxLimits {
            timeout: Duration::from_millis(s.timeout_ms),
            memory_limit_bytes: s.memory_limit_mb * 1024 * 1024,
            lua_hook_interval: s.lua_hook_interval,
            wasm_fuel: s.wasm_fuel,
            wasm_epoch_tick: Duration::from_millis(s.wasm_epoch_tick_ms),
        })
    }

    /// Check every value that has a parsed form.
    pub fn validate(&self) -> Result<()> {
        self.languages()?;
        self.drop_policy()?;
        self.sandbox_limits()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Ferrule function engine configuration
#
# Languages user-defined functions may be written in: "lua", "wasm"
languages = ["lua", "wasm"]

# Dropping a function that an aggregate uses:
#   "reject"  = fail the drop (default)
#   "cascade" = drop the dependent aggregates as well
drop_policy = "reject"

# How long a cached permission decision is trusted (milliseconds).
# 0 checks grants on every call. Grants and revokes made through this
# engine are seen at once; changes made elsewhere to a shared grant table
# may take up to this long to be observed.
permissions_validity_ms = 0

[sandbox]
# Wall-clock budget per invocation
timeout_ms = 1000
# Memory cap per Lua state or Wasm instance
memory_limit_mb = 16
# Lua instructions between deadline checks
lua_hook_interval = 1000
# Wasm fuel per invocation and epoch tick
wasm_fuel = 500000000
wasm_epoch_tick_ms = 10
# Extra call prefixes rejected for every language, e.g. ["string.rep"]
disallowed_prefixes = []
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
