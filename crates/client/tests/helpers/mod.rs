#![allow(dead_code)]

pub mod dns_server_mock;
pub mod mock_transport;

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

pub fn query_message(name: &str, record_type: RecordType, id: u16) -> Message {
    let mut message = Message::new();
    message.set_id(id).set_recursion_desired(true);
    message.add_query(Query::query(Name::from_str(name).unwrap(), record_type));
    message
}

pub fn a_record(name: &str, ttl: u32, ip: Ipv4Addr) -> Record {
    Record::from_rdata(Name::from_str(name).unwrap(), ttl, RData::A(A(ip)))
}

pub fn aaaa_record(name: &str, ttl: u32, ip: Ipv6Addr) -> Record {
    Record::from_rdata(Name::from_str(name).unwrap(), ttl, RData::AAAA(AAAA(ip)))
}

/// Response a well-behaved upstream would send for `query`.
pub fn answer(query: &Message, answers: Vec<Record>) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_op_code(query.op_code())
        .set_message_type(MessageType::Response)
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);
    for question in query.queries() {
        response.add_query(question.clone());
    }
    for record in answers {
        response.add_answer(record);
    }
    response
}
