//! System-resolver transport. Lookup-only (`raw() == false`): the
//! platform resolver hands back addresses, never wire messages.

use super::DnsTransport;
use crate::context::QueryContext;
use async_trait::async_trait;
use manifold_dns_domain::{DnsError, DomainStrategy};
use std::net::IpAddr;
use std::sync::Arc;

pub struct LocalTransport {
    name: Arc<str>,
}

impl LocalTransport {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl DnsTransport for LocalTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw(&self) -> bool {
        false
    }

    async fn lookup(
        &self,
        _ctx: &QueryContext,
        domain: &str,
        strategy: DomainStrategy,
    ) -> Result<Vec<IpAddr>, DnsError> {
        let resolved = tokio::net::lookup_host((domain, 0))
            .await
            .map_err(|_| DnsError::RcodeNameError)?;
        let mut addrs: Vec<IpAddr> = resolved
            .map(|sock| sock.ip().to_canonical())
            .filter(|addr| match strategy {
                DomainStrategy::UseIpv4 => addr.is_ipv4(),
                DomainStrategy::UseIpv6 => addr.is_ipv6(),
                _ => true,
            })
            .collect();
        match strategy {
            DomainStrategy::PreferIpv4 => addrs.sort_by_key(|addr| addr.is_ipv6()),
            DomainStrategy::PreferIpv6 => addrs.sort_by_key(|addr| addr.is_ipv4()),
            _ => {}
        }
        Ok(addrs)
    }
}
