//! Debug transport answering every query with a fixed rcode,
//! selected by the `rcode://<name>` server syntax.

use super::DnsTransport;
use crate::context::QueryContext;
use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use manifold_dns_domain::DnsError;
use std::sync::Arc;

pub struct RcodeTransport {
    name: Arc<str>,
    code: ResponseCode,
}

impl RcodeTransport {
    pub fn new(name: impl Into<Arc<str>>, code: u16) -> Self {
        let code = match code {
            0 => ResponseCode::NoError,
            1 => ResponseCode::FormErr,
            2 => ResponseCode::ServFail,
            3 => ResponseCode::NXDomain,
            4 => ResponseCode::NotImp,
            _ => ResponseCode::Refused,
        };
        Self {
            name: name.into(),
            code,
        }
    }
}

#[async_trait]
impl DnsTransport for RcodeTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw(&self) -> bool {
        true
    }

    async fn exchange(&self, _ctx: &QueryContext, message: &Message) -> Result<Message, DnsError> {
        let mut response = message.clone();
        response
            .set_message_type(MessageType::Response)
            .set_response_code(self.code);
        Ok(response)
    }
}
