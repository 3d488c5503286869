//! DNS lookup probe

use super::{Probe, Sample};
use crate::statistics::StatisticsKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use octoping_common::{defaults, probe, Target};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Resolver settings of the DNS probe
#[derive(Debug, Clone, PartialEq)]
pub struct LookupOptions {
    /// Name server to query. `None` uses the system configuration.
    pub server: Option<SocketAddr>,
    pub timeout: Duration,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            server: None,
            timeout: defaults::TIMEOUT,
        }
    }
}

/// Resolves each target name and counts the returned addresses.
pub struct DnsProbe {
    resolver: TokioResolver,
    options: LookupOptions,
}

impl DnsProbe {
    pub fn new(options: LookupOptions) -> Result<Self> {
        let mut builder = match options.server {
            Some(addr) => Resolver::builder_with_config(
                ResolverConfig::from_parts(
                    None,
                    vec![],
                    NameServerConfigGroup::from_ips_clear(&[addr.ip()], addr.port(), true),
                ),
                TokioConnectionProvider::default(),
            ),
            None => TokioResolver::builder_tokio()
                .context("Failed to read system resolver configuration")?,
        };

        let opts = builder.options_mut();
        opts.timeout = options.timeout;
        opts.attempts = 1;
        // Every cycle must hit the name server
        opts.cache_size = 0;

        Ok(Self {
            resolver: builder.build(),
            options,
        })
    }

    pub fn options(&self) -> &LookupOptions {
        &self.options
    }
}

#[async_trait]
impl Probe for DnsProbe {
    fn name(&self) -> &str {
        probe::DNS
    }

    fn kind(&self) -> StatisticsKind {
        StatisticsKind::Lookup
    }

    async fn check(&self, target: &Target) -> Result<Sample> {
        let lookup = self
            .resolver
            .lookup_ip(target.as_str())
            .await
            .with_context(|| format!("Failed to resolve {}", target))?;

        Ok(Sample::Lookup {
            addresses: lookup.iter().count(),
        })
    }
}

/// Parse a name server address. A bare IP uses the default DNS port.
pub fn parse_server(value: &str) -> Option<SocketAddr> {
    let value = value.trim();
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(SocketAddr::new(ip, defaults::DNS_PORT));
    }
    value.parse::<SocketAddr>().ok()
}
