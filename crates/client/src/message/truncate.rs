use super::codec_error;
use hickory_proto::op::Message;
use manifold_dns_domain::DnsError;

const DEFAULT_MAX_LEN: usize = 512;

/// Fits `response` to what the requester can receive over UDP: the
/// EDNS0 payload size the request advertised, or 512 bytes.
pub fn truncate_message(request: &Message, response: &Message) -> Result<Message, DnsError> {
    let max_len = request
        .extensions()
        .as_ref()
        .map(|edns| usize::from(edns.max_payload()))
        .filter(|len| *len > 0)
        .unwrap_or(DEFAULT_MAX_LEN);
    truncate_to(response, max_len)
}

/// Fits `response` under `max_len` packed bytes.
///
/// Names are compressed on every pack. While the message is still too
/// long, trailing answer records are dropped and the TC flag is set;
/// as a last resort the authority and additional sections are cleared.
pub fn truncate_to(response: &Message, max_len: usize) -> Result<Message, DnsError> {
    let packed = response.to_vec().map_err(codec_error)?;
    if packed.len() <= max_len {
        return Ok(response.clone());
    }
    let mut truncated = response.clone();
    while !truncated.answers().is_empty() {
        let mut answers = truncated.take_answers();
        answers.pop();
        truncated.insert_answers(answers);
        truncated.set_truncated(true);
        if truncated.to_vec().map_err(codec_error)?.len() <= max_len {
            return Ok(truncated);
        }
    }
    truncated.take_name_servers();
    truncated.take_additionals();
    *truncated.extensions_mut() = None;
    Ok(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, Query, ResponseCode};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn wide_response(answers: u32) -> Message {
        let name = Name::from_str("truncation-test.example.com.").unwrap();
        let mut message = Message::new();
        message
            .set_id(0x1234)
            .set_message_type(MessageType::Response)
            .set_response_code(ResponseCode::NoError);
        message.add_query(Query::query(name.clone(), RecordType::A));
        for i in 0..answers {
            message.add_answer(Record::from_rdata(
                name.clone(),
                300,
                RData::A(A(Ipv4Addr::new(10, 0, (i >> 8) as u8, i as u8))),
            ));
        }
        message
    }

    #[test]
    fn short_message_is_untouched() {
        let response = wide_response(2);
        let fitted = truncate_to(&response, 512).unwrap();
        assert_eq!(fitted.answers().len(), 2);
        assert!(!fitted.truncated());
    }

    #[test]
    fn drops_answers_and_sets_tc() {
        let response = wide_response(100);
        let fitted = truncate_to(&response, 512).unwrap();
        assert!(fitted.truncated());
        assert!(fitted.answers().len() < 100);
        assert!(fitted.to_vec().unwrap().len() <= 512);
        // What survives is a prefix of the original answer set.
        assert_eq!(
            fitted.answers(),
            &response.answers()[..fitted.answers().len()]
        );
    }

    #[test]
    fn respects_edns_payload_size() {
        let mut request = Message::new();
        request.add_query(Query::query(
            Name::from_str("truncation-test.example.com.").unwrap(),
            RecordType::A,
        ));
        let mut edns = hickory_proto::op::Edns::new();
        edns.set_max_payload(4096);
        *request.extensions_mut() = Some(edns);

        let response = wide_response(100);
        let fitted = truncate_message(&request, &response).unwrap();
        assert_eq!(fitted.answers().len(), 100);
        assert!(!fitted.truncated());
    }
}
