use crate::options::{Config, HeaderMapExt};
use anyhow::{Context, Result};
use http::HeaderMap;
use polite_lib::{
    ClientBuilder, PoliteClient,
    ratelimit::{DomainResolver, HostName, RateSettings, RegistrableDomain},
};
use std::sync::Arc;
use std::time::Duration;

/// Validate the limits of the command-line config
pub(crate) fn settings(cfg: &Config) -> polite_lib::Result<RateSettings> {
    let global_rate = (!cfg.no_global_rate).then_some(cfg.global_rate);
    let domain_rate = (!cfg.no_domain_rate).then_some(cfg.domain_rate);
    Ok(
        RateSettings::new(global_rate, domain_rate)?
            .with_global_concurrency(cfg.global_concurrency)?
            .with_domain_concurrency(cfg.domain_concurrency)?
            .with_max_retries(cfg.max_retries)
            .with_retry_wait_time(cfg.retry_wait_time)
            .with_retry_policy(cfg.retry_policy)
            .with_max_domains(cfg.max_domains),
    )
}

/// Creates a client according to the command-line config
pub(crate) fn create(cfg: &Config, settings: RateSettings) -> Result<PoliteClient> {
    let headers = HeaderMap::from_header_pairs(&cfg.header)?;
    let resolver: Arc<dyn DomainResolver> = if cfg.per_host {
        Arc::new(HostName)
    } else {
        Arc::new(RegistrableDomain)
    };

    ClientBuilder::builder()
        .settings(settings)
        .resolver(resolver)
        .user_agent(cfg.user_agent.clone())
        .timeout(Duration::from_secs(cfg.timeout as u64))
        .max_redirects(cfg.max_redirects)
        .allow_insecure(cfg.insecure)
        .custom_headers(headers)
        .build()
        .client()
        .context("Failed to create request client")
}
