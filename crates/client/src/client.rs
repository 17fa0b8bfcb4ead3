//! The client engine: cache-aware, strategy-aware query
//! orchestration over any [`DnsTransport`].

use crate::cache::{ResponseCache, MIN_CAPACITY};
use crate::context::QueryContext;
use crate::message::{filter_https_hints, message_to_addresses, min_ttl, set_client_subnet, unify_ttl};
use crate::rdrc::RdrcStore;
use crate::transport::DnsTransport;
use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use manifold_dns_domain::{DnsError, DomainStrategy, QueryOptions, DEFAULT_TIMEOUT_SECS, DEFAULT_TTL};
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Accepts or rejects a whole response message.
pub type ResponseChecker<'a> = &'a (dyn Fn(&Message) -> bool + Send + Sync);
/// Accepts or rejects a looked-up address set.
pub type AddressChecker<'a> = &'a (dyn Fn(&[IpAddr]) -> bool + Send + Sync);

pub type RdrcFactory = Box<dyn Fn() -> Arc<dyn RdrcStore> + Send + Sync>;

pub struct ClientOptions {
    /// Deadline applied around every transport exchange or lookup.
    pub timeout: Duration,
    pub disable_cache: bool,
    /// Cache entries never expire; their TTLs are returned as stored.
    pub disable_expire: bool,
    /// Key the cache by (question, transport) instead of question.
    pub independent_cache: bool,
    /// Response cache capacity; values below 1024 are raised to it.
    pub cache_capacity: usize,
    /// Builds the RDRC store; invoked once by [`Client::start`].
    pub rdrc_factory: Option<RdrcFactory>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            disable_cache: false,
            disable_expire: false,
            independent_cache: false,
            cache_capacity: MIN_CAPACITY,
            rdrc_factory: None,
        }
    }
}

pub struct Client {
    timeout: Duration,
    disable_cache: bool,
    independent_cache: bool,
    cache: Option<ResponseCache>,
    rdrc: RwLock<Option<Arc<dyn RdrcStore>>>,
    rdrc_factory: Option<RdrcFactory>,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        let cache = (!options.disable_cache)
            .then(|| ResponseCache::new(options.cache_capacity, options.disable_expire));
        Self {
            timeout: options.timeout,
            disable_cache: options.disable_cache,
            independent_cache: options.independent_cache,
            cache,
            rdrc: RwLock::new(None),
            rdrc_factory: options.rdrc_factory,
        }
    }

    /// Runs the RDRC factory. Idempotent; call before first use.
    pub fn start(&self) {
        if let Some(factory) = &self.rdrc_factory {
            let mut slot = self.rdrc.write().unwrap();
            if slot.is_none() {
                *slot = Some(factory());
            }
        }
    }

    fn rdrc(&self) -> Option<Arc<dyn RdrcStore>> {
        self.rdrc.read().unwrap().clone()
    }

    pub async fn exchange(
        &self,
        ctx: &QueryContext,
        transport: &dyn DnsTransport,
        message: &Message,
        options: &QueryOptions,
    ) -> Result<Message, DnsError> {
        self.exchange_with_response_check(ctx, transport, message, options, None)
            .await
    }

    pub async fn exchange_with_response_check(
        &self,
        ctx: &QueryContext,
        transport: &dyn DnsTransport,
        message: &Message,
        options: &QueryOptions,
        response_checker: Option<ResponseChecker<'_>>,
    ) -> Result<Message, DnsError> {
        if message.queries().is_empty() {
            warn!(id = message.id(), "bad question size: 0");
            let mut response = Message::new();
            response
                .set_id(message.id())
                .set_op_code(message.op_code())
                .set_message_type(MessageType::Response)
                .set_response_code(ResponseCode::FormErr);
            return Ok(response);
        }
        let question = message.queries()[0].clone();
        // A request is only cacheable when it is nothing but a single
        // plain question.
        let is_simple = message.queries().len() == 1
            && message.name_servers().is_empty()
            && message.additionals().is_empty()
            && message.extensions().is_none()
            && options.client_subnet.is_none();
        let edited;
        let message = match &options.client_subnet {
            Some(prefix) => {
                edited = set_client_subnet(message, prefix, true).into_owned();
                &edited
            }
            None => message,
        };
        let disable_cache = !is_simple || options.disable_cache || self.disable_cache;
        if !disable_cache {
            if let Some((mut cached, ttl)) = self.load_response(&question, Some(transport)) {
                debug!(question = %question.name(), ttl, "cached response");
                cached.set_id(message.id());
                return Ok(cached);
            }
        }
        let qtype = question.query_type();
        if qtype == RecordType::A && options.strategy == DomainStrategy::UseIpv6
            || qtype == RecordType::AAAA && options.strategy == DomainStrategy::UseIpv4
        {
            // Deliberate empty success, not NXDOMAIN: the name may
            // well exist in the other family.
            debug!(question = %question.name(), strategy = %options.strategy, "strategy rejected");
            let mut response = Message::new();
            response
                .set_id(message.id())
                .set_message_type(MessageType::Response)
                .set_response_code(ResponseCode::NoError);
            response.add_query(question);
            return Ok(response);
        }
        if !transport.raw() {
            if qtype == RecordType::A || qtype == RecordType::AAAA {
                return self
                    .exchange_to_lookup(ctx, transport, message, &question, options)
                    .await;
            }
            return Err(DnsError::NoRawSupport);
        }
        let message_id = message.id();
        if let Some(active) = ctx.transport_name() {
            if active == transport.name() {
                return Err(DnsError::QueryLoopback(active.to_string()));
            }
        }
        let ctx = ctx.with_transport_name(transport.name());
        let qname = question.name().to_ascii().to_lowercase();
        if response_checker.is_some() {
            if let Some(store) = self.rdrc() {
                if store.load_rdrc(transport.name(), &qname, u16::from(qtype)) {
                    return Err(DnsError::ResponseRejectedCached);
                }
            }
        }
        let mut response =
            match tokio::time::timeout(self.timeout, transport.exchange(&ctx, message)).await {
                Ok(result) => result?,
                Err(_) => return Err(DnsError::QueryTimeout),
            };
        if let Some(checker) = response_checker {
            if !checker(&response) {
                if let Some(store) = self.rdrc() {
                    spawn_save_rdrc(store, transport.name().to_string(), qname, u16::from(qtype));
                }
                return Err(DnsError::ResponseRejected);
            }
        }
        if qtype == RecordType::HTTPS {
            filter_https_hints(&mut response, options.strategy);
        }
        let mut ttl = min_ttl(&response);
        if let Some(rewrite) = options.rewrite_ttl {
            ttl = rewrite;
        }
        unify_ttl(&mut response, ttl);
        response.set_id(message_id);
        if !disable_cache {
            self.store_response(transport, &question, &response, ttl);
        }
        debug!(question = %question.name(), ttl, "exchanged response");
        Ok(response)
    }

    pub async fn lookup(
        &self,
        ctx: &QueryContext,
        transport: &dyn DnsTransport,
        domain: &str,
        options: &QueryOptions,
    ) -> Result<Vec<IpAddr>, DnsError> {
        self.lookup_with_response_check(ctx, transport, domain, options, None)
            .await
    }

    pub async fn lookup_with_response_check(
        &self,
        ctx: &QueryContext,
        transport: &dyn DnsTransport,
        domain: &str,
        options: &QueryOptions,
        address_checker: Option<AddressChecker<'_>>,
    ) -> Result<Vec<IpAddr>, DnsError> {
        let dns_name = fqdn(domain);
        if transport.raw() {
            match options.strategy {
                DomainStrategy::UseIpv4 => {
                    return self
                        .lookup_to_exchange(
                            ctx,
                            transport,
                            &dns_name,
                            RecordType::A,
                            options,
                            address_checker,
                        )
                        .await;
                }
                DomainStrategy::UseIpv6 => {
                    return self
                        .lookup_to_exchange(
                            ctx,
                            transport,
                            &dns_name,
                            RecordType::AAAA,
                            options,
                            address_checker,
                        )
                        .await;
                }
                _ => {}
            }
            let (response4, response6) = tokio::join!(
                self.lookup_to_exchange(
                    ctx,
                    transport,
                    &dns_name,
                    RecordType::A,
                    options,
                    address_checker,
                ),
                self.lookup_to_exchange(
                    ctx,
                    transport,
                    &dns_name,
                    RecordType::AAAA,
                    options,
                    address_checker,
                ),
            );
            return merge_families(response4, response6, options.strategy);
        }

        let owner =
            Name::from_ascii(&dns_name).map_err(|e| DnsError::InvalidMessage(e.to_string()))?;
        let disable_cache = options.disable_cache || self.disable_cache;
        if !disable_cache {
            match options.strategy {
                DomainStrategy::UseIpv4 => {
                    match self.question_cache(&Query::query(owner.clone(), RecordType::A), Some(transport)) {
                        Err(DnsError::NotCached) => {}
                        other => return other,
                    }
                }
                DomainStrategy::UseIpv6 => {
                    match self.question_cache(&Query::query(owner.clone(), RecordType::AAAA), Some(transport)) {
                        Err(DnsError::NotCached) => {}
                        other => return other,
                    }
                }
                _ => {
                    let cached4 = self
                        .question_cache(&Query::query(owner.clone(), RecordType::A), Some(transport))
                        .unwrap_or_default();
                    let cached6 = self
                        .question_cache(&Query::query(owner.clone(), RecordType::AAAA), Some(transport))
                        .unwrap_or_default();
                    if !cached4.is_empty() || !cached6.is_empty() {
                        return Ok(sort_addresses(cached4, cached6, options.strategy));
                    }
                }
            }
        }
        if address_checker.is_some() {
            if let Some(store) = self.rdrc() {
                let mut rejected = false;
                if options.strategy != DomainStrategy::UseIpv6 {
                    rejected =
                        store.load_rdrc(transport.name(), &dns_name, u16::from(RecordType::A));
                }
                if !rejected && options.strategy != DomainStrategy::UseIpv4 {
                    rejected =
                        store.load_rdrc(transport.name(), &dns_name, u16::from(RecordType::AAAA));
                }
                if rejected {
                    return Err(DnsError::ResponseRejectedCached);
                }
            }
        }
        let host = dns_name.trim_end_matches('.');
        let addresses =
            match tokio::time::timeout(self.timeout, transport.lookup(ctx, host, options.strategy))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(DnsError::QueryTimeout),
            };
        if let Some(checker) = address_checker {
            if !checker(&addresses) {
                if let Some(store) = self.rdrc() {
                    if addresses.iter().any(|addr| addr.to_canonical().is_ipv4()) {
                        spawn_save_rdrc(
                            store.clone(),
                            transport.name().to_string(),
                            dns_name.clone(),
                            u16::from(RecordType::A),
                        );
                    }
                    if addresses.iter().any(|addr| addr.to_canonical().is_ipv6()) {
                        spawn_save_rdrc(
                            store,
                            transport.name().to_string(),
                            dns_name.clone(),
                            u16::from(RecordType::AAAA),
                        );
                    }
                }
                return Err(DnsError::ResponseRejected);
            }
        }
        if !disable_cache {
            let ttl = options.rewrite_ttl.unwrap_or(DEFAULT_TTL);
            if options.strategy != DomainStrategy::UseIpv6 {
                let question = Query::query(owner.clone(), RecordType::A);
                let response = family_response(&question, &addresses, ttl);
                self.store_response(transport, &question, &response, ttl);
            }
            if options.strategy != DomainStrategy::UseIpv4 {
                let question = Query::query(owner, RecordType::AAAA);
                let response = family_response(&question, &addresses, ttl);
                self.store_response(transport, &question, &response, ttl);
            }
        }
        Ok(addresses)
    }

    /// Cache-only lookup. `None` when the cache cannot answer (or is
    /// keyed per transport, in which case there is no shared view).
    pub fn lookup_cache(&self, domain: &str, strategy: DomainStrategy) -> Option<Vec<IpAddr>> {
        if self.independent_cache || self.disable_cache {
            return None;
        }
        let dns_name = fqdn(domain);
        let owner = Name::from_ascii(&dns_name).ok()?;
        match strategy {
            DomainStrategy::UseIpv4 => self
                .question_cache(&Query::query(owner, RecordType::A), None)
                .ok(),
            DomainStrategy::UseIpv6 => self
                .question_cache(&Query::query(owner, RecordType::AAAA), None)
                .ok(),
            _ => {
                let cached4 = self
                    .question_cache(&Query::query(owner.clone(), RecordType::A), None)
                    .unwrap_or_default();
                let cached6 = self
                    .question_cache(&Query::query(owner, RecordType::AAAA), None)
                    .unwrap_or_default();
                if cached4.is_empty() && cached6.is_empty() {
                    return None;
                }
                Some(sort_addresses(cached4, cached6, strategy))
            }
        }
    }

    /// Cache-only exchange, honouring the simple-request rule.
    pub fn exchange_cache(&self, message: &Message) -> Option<Message> {
        if self.independent_cache || self.disable_cache || message.queries().len() != 1 {
            return None;
        }
        let is_simple = message.name_servers().is_empty()
            && message.additionals().is_empty()
            && message.extensions().is_none();
        if !is_simple {
            return None;
        }
        let question = &message.queries()[0];
        let (mut cached, ttl) = self.load_response(question, None)?;
        debug!(question = %question.name(), ttl, "cached response");
        cached.set_id(message.id());
        Some(cached)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    async fn exchange_to_lookup(
        &self,
        ctx: &QueryContext,
        transport: &dyn DnsTransport,
        message: &Message,
        question: &Query,
        options: &QueryOptions,
    ) -> Result<Message, DnsError> {
        let domain = question.name().to_ascii();
        let strategy = if question.query_type() == RecordType::A {
            DomainStrategy::UseIpv4
        } else {
            DomainStrategy::UseIpv6
        };
        let lookup_options = QueryOptions {
            strategy,
            disable_cache: options.disable_cache,
            rewrite_ttl: options.rewrite_ttl,
            client_subnet: None,
        };
        let addresses = Box::pin(self.lookup_with_response_check(
            ctx,
            transport,
            &domain,
            &lookup_options,
            None,
        ))
        .await?;

        let ttl = options.rewrite_ttl.unwrap_or(DEFAULT_TTL);
        let mut response = Message::new();
        response
            .set_id(message.id())
            .set_message_type(MessageType::Response)
            .set_response_code(ResponseCode::NoError);
        for query in message.queries() {
            response.add_query(query.clone());
        }
        for address in addresses {
            let rdata = match address.to_canonical() {
                IpAddr::V4(ip) => RData::A(A(ip)),
                IpAddr::V6(ip) => RData::AAAA(AAAA(ip)),
            };
            let mut record = Record::from_rdata(question.name().clone(), ttl, rdata);
            record.set_dns_class(question.query_class());
            response.add_answer(record);
        }
        Ok(response)
    }

    async fn lookup_to_exchange(
        &self,
        ctx: &QueryContext,
        transport: &dyn DnsTransport,
        dns_name: &str,
        qtype: RecordType,
        options: &QueryOptions,
        address_checker: Option<AddressChecker<'_>>,
    ) -> Result<Vec<IpAddr>, DnsError> {
        let owner =
            Name::from_ascii(dns_name).map_err(|e| DnsError::InvalidMessage(e.to_string()))?;
        let question = Query::query(owner, qtype);
        let disable_cache = options.disable_cache || self.disable_cache;
        if !disable_cache {
            match self.question_cache(&question, Some(transport)) {
                Err(DnsError::NotCached) => {}
                other => return other,
            }
        }
        let mut message = Message::new();
        message
            .set_id(fastrand::u16(..))
            .set_recursion_desired(true);
        message.add_query(question);

        let response = match address_checker {
            Some(checker) => {
                let message_checker = move |response: &Message| match message_to_addresses(response)
                {
                    Ok(addresses) => checker(&addresses),
                    Err(_) => false,
                };
                Box::pin(self.exchange_with_response_check(
                    ctx,
                    transport,
                    &message,
                    options,
                    Some(&message_checker),
                ))
                .await?
            }
            None => {
                Box::pin(self.exchange_with_response_check(ctx, transport, &message, options, None))
                    .await?
            }
        };
        message_to_addresses(&response)
    }

    fn question_cache(
        &self,
        question: &Query,
        transport: Option<&dyn DnsTransport>,
    ) -> Result<Vec<IpAddr>, DnsError> {
        match self.load_response(question, transport) {
            Some((message, _)) => message_to_addresses(&message),
            None => Err(DnsError::NotCached),
        }
    }

    fn load_response(
        &self,
        question: &Query,
        transport: Option<&dyn DnsTransport>,
    ) -> Option<(Message, u32)> {
        let cache = self.cache.as_ref()?;
        let transport_name = if self.independent_cache {
            Some(transport?.name())
        } else {
            None
        };
        cache.load(question, transport_name)
    }

    fn store_response(
        &self,
        transport: &dyn DnsTransport,
        question: &Query,
        response: &Message,
        ttl: u32,
    ) {
        if let Some(cache) = &self.cache {
            let transport_name = self.independent_cache.then(|| transport.name());
            cache.store(question, transport_name, response.clone(), ttl);
        }
    }
}

/// Synthesises the per-family response a non-raw lookup gets cached
/// as. Addresses of the other family are filtered out here.
fn family_response(question: &Query, addresses: &[IpAddr], ttl: u32) -> Message {
    let mut response = Message::new();
    response
        .set_message_type(MessageType::Response)
        .set_response_code(ResponseCode::NoError);
    response.add_query(question.clone());
    for address in addresses {
        let rdata = match (address.to_canonical(), question.query_type()) {
            (IpAddr::V4(ip), RecordType::A) => RData::A(A(ip)),
            (IpAddr::V6(ip), RecordType::AAAA) => RData::AAAA(AAAA(ip)),
            _ => continue,
        };
        let mut record = Record::from_rdata(question.name().clone(), ttl, rdata);
        record.set_dns_class(question.query_class());
        response.add_answer(record);
    }
    response
}

fn merge_families(
    response4: Result<Vec<IpAddr>, DnsError>,
    response6: Result<Vec<IpAddr>, DnsError>,
    strategy: DomainStrategy,
) -> Result<Vec<IpAddr>, DnsError> {
    match (response4, response6) {
        (Ok(v4), Ok(v6)) => Ok(sort_addresses(v4, v6, strategy)),
        (Ok(v4), Err(error)) => {
            if v4.is_empty() {
                Err(error)
            } else {
                Ok(sort_addresses(v4, Vec::new(), strategy))
            }
        }
        (Err(error), Ok(v6)) => {
            if v6.is_empty() {
                Err(error)
            } else {
                Ok(sort_addresses(Vec::new(), v6, strategy))
            }
        }
        (Err(error), Err(_)) => Err(error),
    }
}

fn sort_addresses(
    response4: Vec<IpAddr>,
    response6: Vec<IpAddr>,
    strategy: DomainStrategy,
) -> Vec<IpAddr> {
    let (mut first, second) = if strategy == DomainStrategy::PreferIpv6 {
        (response6, response4)
    } else {
        (response4, response6)
    };
    first.extend(second);
    first
}

fn fqdn(domain: &str) -> String {
    let mut name = domain.trim_end_matches('.').to_lowercase();
    name.push('.');
    name
}

fn spawn_save_rdrc(store: Arc<dyn RdrcStore>, transport: String, qname: String, qtype: u16) {
    tokio::spawn(async move {
        if let Err(error) = store.save_rdrc(&transport, &qname, qtype).await {
            warn!(transport = %transport, qname = %qname, qtype, %error, "saving rejected response failed");
        }
    });
}
