// src/blockchain/fallback.rs
//! Waterfall fallback over an ordered list of chain RPC providers.
//!
//! Providers are tried strictly one after another, most preferred first.
//! Connectivity failures move on to the next provider. A call exception is
//! returned at once since every provider would answer the same.

use crate::blockchain::network::Network;
use crate::blockchain::provider::{HttpProvider, PerformRequest, ProviderEndpoint};
use crate::error::ProviderError;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Outcome of releasing every provider of a dispatcher.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub released: Vec<String>,
    pub failures: Vec<(String, ProviderError)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Dispatches chain requests to the first provider able to answer.
pub struct FallbackDispatcher {
    providers: Vec<Arc<dyn ProviderEndpoint>>,
    network: Mutex<Option<Network>>,
}

impl FallbackDispatcher {
    pub fn new(providers: Vec<Arc<dyn ProviderEndpoint>>) -> Self {
        Self {
            providers,
            network: Mutex::new(None),
        }
    }

    /// Builds a dispatcher of [`HttpProvider`]s in the given order.
    pub fn from_urls<S: AsRef<str>>(urls: &[S], timeout: Duration) -> Result<Self, ProviderError> {
        let providers = urls
            .iter()
            .map(|url| {
                HttpProvider::new(url.as_ref(), timeout)
                    .map(|provider| Arc::new(provider) as Arc<dyn ProviderEndpoint>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(providers))
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Performs `request` on the first provider that answers.
    ///
    /// # Errors
    /// - [`ProviderError::NoProvidersConfigured`] for an empty provider list
    /// - The first non fallback-eligible error, immediately
    /// - The first recorded error when every provider failed
    pub async fn perform(&self, request: &PerformRequest) -> Result<Value, ProviderError> {
        let mut errors: Vec<ProviderError> = Vec::new();

        for provider in &self.providers {
            match provider.perform(request).await {
                Ok(value) => {
                    if !errors.is_empty() {
                        debug!(
                            "{} answered {} after {} failed provider(s)",
                            provider.name(),
                            request.method(),
                            errors.len()
                        );
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_fallback_eligible() => return Err(e),
                Err(e) => {
                    warn!(
                        "Provider {} failed {}, falling back to next provider: {}",
                        provider.name(),
                        request.method(),
                        e
                    );
                    errors.push(e);
                }
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Err(ProviderError::NoProvidersConfigured),
        }
    }

    /// Detects the chain through the fallback path.
    ///
    /// The last detected network is cached and returned when every provider
    /// is unreachable.
    pub async fn detect_network(&self) -> Result<Network, ProviderError> {
        match self.perform(&PerformRequest::ChainId).await {
            Ok(value) => {
                let network = Network::from_value(&value)?;
                *self.network.lock().await = Some(network.clone());
                Ok(network)
            }
            Err(e) => match self.network.lock().await.clone() {
                Some(cached) if e.is_fallback_eligible() => {
                    warn!("Using cached network {} after provider failure: {}", cached.name, e);
                    Ok(cached)
                }
                _ => Err(e),
            },
        }
    }

    pub async fn cached_network(&self) -> Option<Network> {
        self.network.lock().await.clone()
    }

    /// Releases every provider. Failures are logged and do not stop the rest.
    pub async fn destroy(&self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for provider in &self.providers {
            let name = provider.name().to_string();
            match provider.destroy().await {
                Ok(()) => report.released.push(name),
                Err(e) => {
                    warn!("Failed to release provider {}: {}", name, e);
                    report.failures.push((name, e));
                }
            }
        }
        *self.network.lock().await = None;
        info!(
            "Released {} provider(s), {} failure(s)",
            report.released.len(),
            report.failures.len()
        );
        report
    }
}
