// src/config.rs
//! Runtime settings.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. Optional `tokenscript.toml` in the working directory
//! 3. Environment variables prefixed with `TOKENSCRIPT_` (`__` separates nested keys)
//!
//! Example `tokenscript.toml`:
//! ```toml
//! rpc_urls = "https://eth.llamarpc.com,https://rpc.ankr.com/eth"
//!
//! [[trusted_keys]]
//! issuer_name = "Smart Token Labs"
//! value_type = "ethAddress"
//! value = "0x0000000000000000000000000000000000000001"
//!
//! [[contract_origins]]
//! name = "Ticket"
//! address = "0x00000000000000000000000000000000000000c0"
//! ```

use crate::blockchain::fallback::FallbackDispatcher;
use crate::error::{ProviderError, SettingsError};
use crate::security::contract_key::ContractOrigin;
use crate::security::trust::TrustedKey;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "tokenscript";
pub const ENV_PREFIX: &str = "TOKENSCRIPT";

#[derive(Debug, Deserialize)]
struct RawSettings {
    rpc_urls: String,
    provider_timeout_ms: u64,
    log_level: String,
    #[serde(default)]
    trusted_keys: Vec<TrustedKey>,
    #[serde(default)]
    contract_origins: Vec<RawContractOrigin>,
}

#[derive(Debug, Deserialize)]
struct RawContractOrigin {
    name: String,
    address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Chain RPC endpoints, most preferred first.
    pub rpc_urls: Vec<String>,
    /// Per-request timeout of an HTTP provider.
    pub provider_timeout: Duration,
    pub log_level: String,
    pub trusted_keys: Vec<TrustedKey>,
    /// Contracts whose admins authenticate the TokenScript.
    pub contract_origins: Vec<ContractOrigin>,
}

impl Settings {
    /// Loads settings from defaults, `tokenscript.toml` and the environment.
    pub fn load() -> Result<Self, SettingsError> {
        let builder = defaults()?
            .add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            );
        Self::from_config(builder.build()?)
    }

    /// Loads settings from defaults and TOML text only.
    pub fn from_toml_str(toml: &str) -> Result<Self, SettingsError> {
        let config = defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, SettingsError> {
        let raw: RawSettings = config.try_deserialize()?;

        let rpc_urls: Vec<String> = raw
            .rpc_urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if let Some(url) = rpc_urls
            .iter()
            .find(|url| !url.starts_with("http://") && !url.starts_with("https://"))
        {
            return Err(invalid("rpc_urls", format!("{} is not an HTTP(S) URL", url)));
        }
        if raw.provider_timeout_ms == 0 {
            return Err(invalid("provider_timeout_ms", "must be positive"));
        }

        let contract_origins = raw
            .contract_origins
            .into_iter()
            .map(|origin| match origin.address.trim().parse() {
                Ok(address) => Ok(ContractOrigin {
                    name: origin.name,
                    address,
                }),
                Err(_) => Err(invalid(
                    "contract_origins",
                    format!("{} is not a contract address", origin.address),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rpc_urls,
            provider_timeout: Duration::from_millis(raw.provider_timeout_ms),
            log_level: raw.log_level,
            trusted_keys: raw.trusted_keys,
            contract_origins,
        })
    }

    /// A dispatcher over the configured RPC URLs.
    pub fn dispatcher(&self) -> Result<FallbackDispatcher, ProviderError> {
        FallbackDispatcher::from_urls(&self.rpc_urls, self.provider_timeout)
    }
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, SettingsError> {
    Ok(Config::builder()
        .set_default("rpc_urls", "")?
        .set_default("provider_timeout_ms", 30_000u64)?
        .set_default("log_level", "info")?)
}

fn invalid(key: &str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}
