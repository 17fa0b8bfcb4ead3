//! Scriptable in-process transport for engine tests.

use async_trait::async_trait;
use hickory_proto::op::Message;
use manifold_dns_client::{DnsError, DnsTransport, DomainStrategy, QueryContext};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type ExchangeFn = Box<dyn Fn(&Message) -> Result<Message, DnsError> + Send + Sync>;
type LookupFn = Box<dyn Fn(&str, DomainStrategy) -> Result<Vec<IpAddr>, DnsError> + Send + Sync>;

pub struct MockTransport {
    name: String,
    queries: Arc<AtomicUsize>,
    exchange_fn: Option<ExchangeFn>,
    lookup_fn: Option<LookupFn>,
}

impl MockTransport {
    /// Raw transport backed by a response script.
    pub fn raw(
        name: &str,
        exchange: impl Fn(&Message) -> Result<Message, DnsError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            queries: Arc::new(AtomicUsize::new(0)),
            exchange_fn: Some(Box::new(exchange)),
            lookup_fn: None,
        }
    }

    /// Non-raw transport backed by an address script.
    pub fn lookup_only(
        name: &str,
        lookup: impl Fn(&str, DomainStrategy) -> Result<Vec<IpAddr>, DnsError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            queries: Arc::new(AtomicUsize::new(0)),
            exchange_fn: None,
            lookup_fn: Some(Box::new(lookup)),
        }
    }

    /// How many times the upstream was actually asked.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsTransport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw(&self) -> bool {
        self.exchange_fn.is_some()
    }

    async fn exchange(&self, _ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        match &self.exchange_fn {
            Some(exchange) => {
                self.queries.fetch_add(1, Ordering::SeqCst);
                exchange(message)
            }
            None => Err(DnsError::NoRawSupport),
        }
    }

    async fn lookup(
        &self,
        _ctx: &QueryContext,
        domain: &str,
        strategy: DomainStrategy,
    ) -> Result<Vec<IpAddr>, DnsError> {
        match &self.lookup_fn {
            Some(lookup) => {
                self.queries.fetch_add(1, Ordering::SeqCst);
                lookup(domain, strategy)
            }
            None => Err(DnsError::NoRawSupport),
        }
    }
}
