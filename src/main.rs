// src/main.rs

//! # TokenScript Trust - Command Line Entry Point
//!
//! Verifies the signature of a TokenScript file and reports how far it can
//! be trusted.
//!
//! ## Usage
//! `tokenscript-trust <file.tsml>`
//!
//! ## Environment Variables
//! - `RUST_LOG`: Log filter (defaults to the `log_level` setting)
//! - `TOKENSCRIPT_RPC_URLS`: (Optional) Comma separated chain RPC URLs
//! - `TOKENSCRIPT_PROVIDER_TIMEOUT_MS`: (Optional) Per-request provider timeout

use anyhow::{bail, Context, Result};
use dotenv::dotenv;
use log::{info, warn};
use std::sync::Arc;
use tokenscript_trust::config::Settings;
use tokenscript_trust::security::contract_key::ContractKeyResolver;
use tokenscript_trust::security::trust::TrustDecision;
use tokenscript_trust::{verify_signature, TokenScriptDocument};

/// Application entry point
///
/// # Sequence
/// 1. Load environment and settings
/// 2. Verify the TokenScript signature
/// 3. With RPC URLs configured, detect the chain and check the signer's
///    authority over each configured contract origin, then release the providers
/// 4. Print the verdict with its trust decision
#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let settings = Settings::load().context("failed to load settings")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log_level))
        .init();

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => bail!("usage: tokenscript-trust <file.tsml>"),
    };

    let bytes = std::fs::read(&path).with_context(|| format!("failed to read {}", path))?;
    let document = TokenScriptDocument::from_bytes(&bytes)
        .with_context(|| format!("{} is not a TokenScript document", path))?;
    info!("Loaded TokenScript {:?} from {}", document.name(), path);

    let verdict = verify_signature(&document);
    let mut origin_statuses = Vec::new();

    if !settings.rpc_urls.is_empty() {
        let dispatcher = Arc::new(settings.dispatcher().context("failed to create providers")?);
        match dispatcher.detect_network().await {
            Ok(network) => info!("Connected to {} (chain {})", network.name, network.chain_id),
            Err(e) => warn!("Could not detect network: {}", e),
        }

        let resolver = ContractKeyResolver::new(dispatcher.clone());
        for origin in &settings.contract_origins {
            origin_statuses.push(resolver.origin_status(origin, &verdict).await);
        }

        let report = dispatcher.destroy().await;
        if !report.is_clean() {
            warn!("{} provider(s) failed to release", report.failures.len());
        }
    } else if !settings.contract_origins.is_empty() {
        warn!("Contract origins are configured but no RPC URLs, skipping origin checks");
    }

    let security = TrustDecision::evaluate(verdict, &settings.trusted_keys, origin_statuses);
    if let Some(trusted) = &security.trusted_key {
        info!("Signed by trusted issuer {}", trusted.issuer_name);
    }
    println!("{}", serde_json::to_string_pretty(&security)?);

    Ok(())
}
