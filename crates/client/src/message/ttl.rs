use hickory_proto::op::Message;
use hickory_proto::rr::rdata::svcb::{SvcParamKey, SVCB};
use hickory_proto::rr::rdata::HTTPS;
use hickory_proto::rr::{RData, Record, RecordType};
use manifold_dns_domain::DomainStrategy;

/// Minimum TTL across answer, authority and additional records,
/// skipping OPT pseudo-records and records whose header TTL is 0.
/// Returns 0 when no record carries a positive TTL.
pub fn min_ttl(message: &Message) -> u32 {
    let mut minimum = 0u32;
    for record in sections(message) {
        if record.record_type() == RecordType::OPT {
            continue;
        }
        let ttl = record.ttl();
        if ttl > 0 && (minimum == 0 || ttl < minimum) {
            minimum = ttl;
        }
    }
    minimum
}

/// Writes `ttl` into every non-OPT record header.
///
/// The OPT pseudo-record is exempt: its TTL field encodes the EDNS0
/// extended rcode and version. (hickory keeps EDNS0 out of the record
/// sections entirely, so the guard only matters for hand-built
/// messages.)
pub fn unify_ttl(message: &mut Message, ttl: u32) {
    for_each_record(message, |record| {
        record.set_ttl(ttl);
    });
}

/// Ages every non-OPT record by `elapsed` seconds, clamping at 0.
pub fn decay_ttl(message: &mut Message, elapsed: u32) {
    for_each_record(message, |record| {
        record.set_ttl(record.ttl().saturating_sub(elapsed));
    });
}

/// Drops HTTPS/SVCB address hints of the family the strategy excludes:
/// `UseIpv4` removes ipv6hint parameters and `UseIpv6` removes
/// ipv4hint parameters. Other strategies leave records untouched.
pub fn filter_https_hints(message: &mut Message, strategy: DomainStrategy) {
    let excluded = match strategy {
        DomainStrategy::UseIpv4 => SvcParamKey::Ipv6Hint,
        DomainStrategy::UseIpv6 => SvcParamKey::Ipv4Hint,
        _ => return,
    };
    let answers = message.take_answers();
    let answers = answers
        .into_iter()
        .map(|mut record| {
            if let Some(RData::HTTPS(https)) = record.data() {
                let params = https
                    .svc_params()
                    .iter()
                    .filter(|(key, _)| *key != excluded)
                    .cloned()
                    .collect();
                let svcb = SVCB::new(https.svc_priority(), https.target_name().clone(), params);
                record.set_data(Some(RData::HTTPS(HTTPS(svcb))));
            }
            record
        })
        .collect();
    message.insert_answers(answers);
}

fn sections(message: &Message) -> impl Iterator<Item = &Record> {
    message
        .answers()
        .iter()
        .chain(message.name_servers())
        .chain(message.additionals())
}

fn for_each_record(message: &mut Message, apply: impl Fn(&mut Record)) {
    let mut rewrite = |records: Vec<Record>| -> Vec<Record> {
        records
            .into_iter()
            .map(|mut record| {
                if record.record_type() != RecordType::OPT {
                    apply(&mut record);
                }
                record
            })
            .collect()
    };
    let answers = rewrite(message.take_answers());
    message.insert_answers(answers);
    let name_servers = rewrite(message.take_name_servers());
    message.insert_name_servers(name_servers);
    let additionals = rewrite(message.take_additionals());
    message.insert_additionals(additionals);
}
