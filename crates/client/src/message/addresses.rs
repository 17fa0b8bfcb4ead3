use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::rdata::svcb::SvcParamValue;
use hickory_proto::rr::RData;
use manifold_dns_domain::DnsError;
use std::net::IpAddr;

/// Extracts every address an answer section carries: A and AAAA
/// records, plus the ipv4hint/ipv6hint parameters of HTTPS records.
///
/// NXDOMAIN yields an empty list; any other non-success rcode is an
/// error carrying the code.
pub fn message_to_addresses(response: &Message) -> Result<Vec<IpAddr>, DnsError> {
    let rcode = response.response_code();
    if rcode != ResponseCode::NoError && rcode != ResponseCode::NXDomain {
        return Err(DnsError::UnexpectedRcode(u16::from(rcode.low())));
    }
    let mut addresses = Vec::with_capacity(response.answers().len());
    for record in response.answers() {
        match record.data() {
            Some(RData::A(a)) => addresses.push(IpAddr::V4(a.0)),
            Some(RData::AAAA(aaaa)) => addresses.push(IpAddr::V6(aaaa.0)),
            Some(RData::HTTPS(https)) => {
                for (_, value) in https.svc_params() {
                    match value {
                        SvcParamValue::Ipv4Hint(hint) => {
                            addresses.extend(hint.0.iter().map(|a| IpAddr::V4(a.0)));
                        }
                        SvcParamValue::Ipv6Hint(hint) => {
                            addresses.extend(hint.0.iter().map(|aaaa| IpAddr::V6(aaaa.0)));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    Ok(addresses)
}
