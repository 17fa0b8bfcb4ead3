mod helpers;

use async_trait::async_trait;
use helpers::mock_transport::MockTransport;
use helpers::{a_record, aaaa_record, answer, query_message};
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::rdata::svcb::{IpHint, SvcParamKey, SvcParamValue, SVCB};
use hickory_proto::rr::rdata::{A, AAAA, HTTPS};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use manifold_dns_client::message::client_subnet;
use manifold_dns_client::{
    Client, ClientOptions, DnsError, DnsTransport, DomainStrategy, MemoryRdrcStore, QueryContext,
    QueryOptions, RdrcStore,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn client() -> Client {
    Client::new(ClientOptions::default())
}

fn example_transport(ttl: u32) -> MockTransport {
    MockTransport::raw("mock", move |query| {
        let name = query.queries()[0].name().to_ascii();
        Ok(answer(
            query,
            vec![a_record(&name, ttl, Ipv4Addr::new(93, 184, 216, 34))],
        ))
    })
}

#[tokio::test]
async fn empty_question_synthesises_format_error() {
    let client = client();
    let transport = example_transport(120);
    let mut message = Message::new();
    message.set_id(0x5151);

    let response = client
        .exchange(&QueryContext::new(), &transport, &message, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(response.id(), 0x5151);
    assert_eq!(response.response_code(), ResponseCode::FormErr);
    assert_eq!(response.message_type(), MessageType::Response);
    assert_eq!(transport.query_count(), 0);
}

#[tokio::test]
async fn exchange_restores_id_and_caches() {
    let client = client();
    let transport = example_transport(120);
    let ctx = QueryContext::new();

    let request = query_message("example.com.", RecordType::A, 0xABCD);
    let response = client
        .exchange(&ctx, &transport, &request, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(response.id(), 0xABCD);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].ttl(), 120);

    // A repeat within the TTL window is served from cache, under the
    // caller's new ID, with a decayed TTL.
    let repeat = query_message("example.com.", RecordType::A, 0x1234);
    let cached = client
        .exchange(&ctx, &transport, &repeat, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(transport.query_count(), 1);
    assert_eq!(cached.id(), 0x1234);
    assert_eq!(cached.answers().len(), 1);
    let ttl = cached.answers()[0].ttl();
    assert!((118..=120).contains(&ttl), "decayed ttl = {}", ttl);
}

#[tokio::test]
async fn rewrite_ttl_overrides_upstream_ttl() {
    let client = client();
    let transport = example_transport(120);
    let options = QueryOptions {
        rewrite_ttl: Some(30),
        ..QueryOptions::default()
    };

    let request = query_message("example.com.", RecordType::A, 0x2020);
    let response = client
        .exchange(&QueryContext::new(), &transport, &request, &options)
        .await
        .unwrap();
    assert_eq!(response.answers()[0].ttl(), 30);

    let cached = client
        .exchange(
            &QueryContext::new(),
            &transport,
            &query_message("example.com.", RecordType::A, 0x2021),
            &options,
        )
        .await
        .unwrap();
    assert_eq!(transport.query_count(), 1);
    assert!(cached.answers()[0].ttl() <= 30);
}

#[tokio::test]
async fn strategy_reject_returns_empty_success() {
    let client = client();
    let transport = example_transport(120);
    let options = QueryOptions::with_strategy(DomainStrategy::UseIpv6);

    let request = query_message("example.com.", RecordType::A, 0x7777);
    let response = client
        .exchange(&QueryContext::new(), &transport, &request, &options)
        .await
        .unwrap();
    assert_eq!(response.id(), 0x7777);
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert!(response.answers().is_empty());
    assert_eq!(response.queries().len(), 1);
    assert_eq!(transport.query_count(), 0);
}

#[tokio::test]
async fn https_records_lose_opposing_family_hints() {
    let transport = MockTransport::raw("mock", |query| {
        let name = query.queries()[0].name().clone();
        let svcb = SVCB::new(
            1,
            Name::root(),
            vec![
                (
                    SvcParamKey::Ipv4Hint,
                    SvcParamValue::Ipv4Hint(IpHint(vec![A(Ipv4Addr::new(1, 2, 3, 4))])),
                ),
                (
                    SvcParamKey::Ipv6Hint,
                    SvcParamValue::Ipv6Hint(IpHint(vec![AAAA(
                        Ipv6Addr::from_str("2001:db8::1").unwrap(),
                    )])),
                ),
            ],
        );
        Ok(answer(
            query,
            vec![Record::from_rdata(name, 300, RData::HTTPS(HTTPS(svcb)))],
        ))
    });
    let client = client();
    let options = QueryOptions::with_strategy(DomainStrategy::UseIpv4);

    let request = query_message("example.com.", RecordType::HTTPS, 0x0901);
    let response = client
        .exchange(&QueryContext::new(), &transport, &request, &options)
        .await
        .unwrap();

    let Some(RData::HTTPS(https)) = response.answers()[0].data() else {
        panic!("HTTPS answer missing");
    };
    let keys: Vec<SvcParamKey> = https.svc_params().iter().map(|(key, _)| *key).collect();
    assert_eq!(keys, vec![SvcParamKey::Ipv4Hint]);
}

#[tokio::test]
async fn lookup_orders_families_by_strategy() {
    let transport = MockTransport::raw("mock", |query| {
        let question = &query.queries()[0];
        let name = question.name().to_ascii();
        let records = match question.query_type() {
            RecordType::A => vec![a_record(&name, 300, Ipv4Addr::new(1, 2, 3, 4))],
            RecordType::AAAA => vec![aaaa_record(
                &name,
                300,
                Ipv6Addr::from_str("2001:db8::1").unwrap(),
            )],
            _ => vec![],
        };
        Ok(answer(query, records))
    });
    let client = client();
    let options = QueryOptions::with_strategy(DomainStrategy::PreferIpv6);

    let addresses = client
        .lookup(&QueryContext::new(), &transport, "www.google.com", &options)
        .await
        .unwrap();
    assert_eq!(
        addresses,
        vec![
            IpAddr::V6(Ipv6Addr::from_str("2001:db8::1").unwrap()),
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
        ]
    );
    // Both families were exchanged.
    assert_eq!(transport.query_count(), 2);
}

#[tokio::test]
async fn use_ipv4_lookup_asks_one_family() {
    let transport = MockTransport::raw("mock", |query| {
        let question = &query.queries()[0];
        assert_eq!(question.query_type(), RecordType::A);
        let name = question.name().to_ascii();
        Ok(answer(
            query,
            vec![a_record(&name, 300, Ipv4Addr::new(1, 2, 3, 4))],
        ))
    });
    let client = client();
    let options = QueryOptions::with_strategy(DomainStrategy::UseIpv4);

    let addresses = client
        .lookup(&QueryContext::new(), &transport, "example.com", &options)
        .await
        .unwrap();
    assert_eq!(addresses, vec![IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))]);
    assert_eq!(transport.query_count(), 1);
}

#[tokio::test]
async fn client_subnet_is_injected_without_mutating_caller() {
    let captured: Arc<Mutex<Option<Message>>> = Arc::new(Mutex::new(None));
    let seen = captured.clone();
    let transport = MockTransport::raw("mock", move |query| {
        seen.lock().unwrap().replace(query.clone());
        let name = query.queries()[0].name().to_ascii();
        Ok(answer(
            query,
            vec![a_record(&name, 120, Ipv4Addr::new(93, 184, 216, 34))],
        ))
    });
    let client = client();
    let prefix = "192.0.2.0/24".parse().unwrap();
    let options = QueryOptions {
        client_subnet: Some(prefix),
        ..QueryOptions::default()
    };

    let request = query_message("example.com.", RecordType::A, 0x0E05);
    client
        .exchange(&QueryContext::new(), &transport, &request, &options)
        .await
        .unwrap();

    // The caller's message was not touched.
    assert!(request.extensions().is_none());
    // The outbound copy carries the subnet option.
    let outbound = captured.lock().unwrap().take().unwrap();
    assert_eq!(client_subnet(&outbound), Some(prefix));
}

struct ReenteringTransport {
    name: String,
    client: Arc<Client>,
    delegate: Option<Arc<MockTransport>>,
}

#[async_trait]
impl DnsTransport for ReenteringTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw(&self) -> bool {
        true
    }

    async fn exchange(&self, ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        match &self.delegate {
            Some(delegate) => {
                self.client
                    .exchange(ctx, delegate.as_ref(), message, &QueryOptions::default())
                    .await
            }
            None => {
                self.client
                    .exchange(ctx, self, message, &QueryOptions::default())
                    .await
            }
        }
    }
}

#[tokio::test]
async fn transport_loopback_is_detected() {
    let client = Arc::new(client());
    let transport = ReenteringTransport {
        name: "t1".to_string(),
        client: client.clone(),
        delegate: None,
    };

    let request = query_message("example.com.", RecordType::A, 1);
    let error = client
        .exchange(&QueryContext::new(), &transport, &request, &QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(error, DnsError::QueryLoopback("t1".to_string()));
}

#[tokio::test]
async fn chaining_to_another_transport_is_fine() {
    let client = Arc::new(client());
    let inner = Arc::new(example_transport(120));
    let transport = ReenteringTransport {
        name: "t1".to_string(),
        client: client.clone(),
        delegate: Some(inner.clone()),
    };

    let request = query_message("example.com.", RecordType::A, 2);
    let response = client
        .exchange(&QueryContext::new(), &transport, &request, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(response.id(), 2);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(inner.query_count(), 1);
}

#[tokio::test]
async fn rejected_responses_are_remembered() {
    let options = ClientOptions {
        rdrc_factory: Some(Box::new(|| {
            let store: Arc<dyn RdrcStore> = Arc::new(MemoryRdrcStore::default());
            store
        })),
        ..ClientOptions::default()
    };
    let client = Client::new(options);
    client.start();
    let transport = example_transport(120);
    let reject_all = |_: &Message| false;

    let request = query_message("rejected.example.com.", RecordType::A, 0x0B0B);
    let error = client
        .exchange_with_response_check(
            &QueryContext::new(),
            &transport,
            &request,
            &QueryOptions::default(),
            Some(&reject_all),
        )
        .await
        .unwrap_err();
    assert_eq!(error, DnsError::ResponseRejected);
    assert_eq!(transport.query_count(), 1);

    // The save is fire-and-forget; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let error = client
        .exchange_with_response_check(
            &QueryContext::new(),
            &transport,
            &request,
            &QueryOptions::default(),
            Some(&reject_all),
        )
        .await
        .unwrap_err();
    assert_eq!(error, DnsError::ResponseRejectedCached);
    assert_eq!(transport.query_count(), 1, "second query must not dispatch");
}

#[tokio::test]
async fn non_raw_exchange_synthesises_a_response() {
    let transport = MockTransport::lookup_only("system", |domain, strategy| {
        assert_eq!(domain, "printer.local");
        assert_eq!(strategy, DomainStrategy::UseIpv4);
        Ok(vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))])
    });
    let client = client();

    let request = query_message("printer.local.", RecordType::A, 0x0AAA);
    let response = client
        .exchange(&QueryContext::new(), &transport, &request, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(response.id(), 0x0AAA);
    assert_eq!(response.response_code(), ResponseCode::NoError);
    assert_eq!(response.answers().len(), 1);
    assert_eq!(response.answers()[0].ttl(), 600);
    assert_eq!(
        response.answers()[0].data(),
        Some(&RData::A(A(Ipv4Addr::new(10, 0, 0, 9))))
    );
}

#[tokio::test]
async fn non_raw_exchange_rejects_other_types() {
    let transport = MockTransport::lookup_only("system", |_, _| Ok(vec![]));
    let client = client();

    let request = query_message("example.com.", RecordType::TXT, 3);
    let error = client
        .exchange(&QueryContext::new(), &transport, &request, &QueryOptions::default())
        .await
        .unwrap_err();
    assert_eq!(error, DnsError::NoRawSupport);
}

#[tokio::test]
async fn cache_probes_see_stored_answers() {
    let client = client();
    let transport = example_transport(300);

    let request = query_message("example.com.", RecordType::A, 0x3333);
    client
        .exchange(&QueryContext::new(), &transport, &request, &QueryOptions::default())
        .await
        .unwrap();

    let probe = query_message("example.com.", RecordType::A, 0x4444);
    let cached = client.exchange_cache(&probe).unwrap();
    assert_eq!(cached.id(), 0x4444);
    assert_eq!(cached.answers().len(), 1);

    let addresses = client
        .lookup_cache("example.com", DomainStrategy::AsIs)
        .unwrap();
    assert_eq!(addresses, vec![IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]);

    assert!(client.lookup_cache("missing.example.com", DomainStrategy::AsIs).is_none());

    client.clear_cache();
    assert!(client.exchange_cache(&probe).is_none());
}

#[tokio::test]
async fn disable_cache_option_always_dispatches() {
    let client = client();
    let transport = example_transport(120);
    let options = QueryOptions {
        disable_cache: true,
        ..QueryOptions::default()
    };

    for id in [10, 11] {
        client
            .exchange(
                &QueryContext::new(),
                &transport,
                &query_message("example.com.", RecordType::A, id),
                &options,
            )
            .await
            .unwrap();
    }
    assert_eq!(transport.query_count(), 2);
}

#[tokio::test]
async fn upstream_rcode_failures_surface_from_lookup() {
    let transport = MockTransport::raw("mock", |query| {
        let mut response = answer(query, vec![]);
        response.set_response_code(ResponseCode::ServFail);
        Ok(response)
    });
    let client = client();

    let error = client
        .lookup(
            &QueryContext::new(),
            &transport,
            "example.com",
            &QueryOptions::with_strategy(DomainStrategy::UseIpv4),
        )
        .await
        .unwrap_err();
    assert_eq!(error, DnsError::UnexpectedRcode(2));
}
