use hickory_proto::op::{Edns, Message};
use hickory_proto::rr::rdata::opt::{EdnsCode, EdnsOption};
use ipnetwork::IpNetwork;
use std::borrow::Cow;
use std::net::IpAddr;

/// RFC 7871 address family codes.
const FAMILY_IPV4: u16 = 1;
const FAMILY_IPV6: u16 = 2;

/// Attaches an EDNS0 client-subnet option (RFC 7871, option code 8)
/// to a query.
///
/// Appends an OPT pseudo-record when the message has none. An already
/// present subnet option is left alone unless `override_existing` is
/// set, in which case it is replaced. The caller's message is never
/// mutated: the returned value is either the borrowed original (no
/// change was needed) or an edited copy.
pub fn set_client_subnet<'a>(
    message: &'a Message,
    prefix: &IpNetwork,
    override_existing: bool,
) -> Cow<'a, Message> {
    let has_subnet = message
        .extensions()
        .as_ref()
        .map(|edns| edns.options().get(EdnsCode::Subnet).is_some())
        .unwrap_or(false);
    if has_subnet && !override_existing {
        return Cow::Borrowed(message);
    }
    let mut edited = message.clone();
    let edns = edited.extensions_mut().get_or_insert_with(Edns::new);
    edns.options_mut()
        .insert(EdnsOption::Unknown(u16::from(EdnsCode::Subnet), encode(prefix)));
    Cow::Owned(edited)
}

/// Reads the client-subnet option back out of a message, if any.
pub fn client_subnet(message: &Message) -> Option<IpNetwork> {
    let edns = message.extensions().as_ref()?;
    match edns.options().get(EdnsCode::Subnet)? {
        EdnsOption::Unknown(_, data) => decode(data),
        _ => None,
    }
}

fn encode(prefix: &IpNetwork) -> Vec<u8> {
    let (family, octets): (u16, Vec<u8>) = match prefix.ip() {
        IpAddr::V4(ip) => (FAMILY_IPV4, ip.octets().to_vec()),
        IpAddr::V6(ip) => (FAMILY_IPV6, ip.octets().to_vec()),
    };
    let source_netmask = prefix.prefix();
    let address_len = usize::from(source_netmask.div_ceil(8));
    let mut data = Vec::with_capacity(4 + address_len);
    data.extend_from_slice(&family.to_be_bytes());
    data.push(source_netmask);
    data.push(0); // scope prefix-length, always zero in queries
    data.extend_from_slice(&octets[..address_len]);
    data
}

fn decode(data: &[u8]) -> Option<IpNetwork> {
    if data.len() < 4 {
        return None;
    }
    let family = u16::from_be_bytes([data[0], data[1]]);
    let source_netmask = data[2];
    let address = &data[4..];
    let ip = match family {
        FAMILY_IPV4 => {
            let mut octets = [0u8; 4];
            octets[..address.len().min(4)].copy_from_slice(&address[..address.len().min(4)]);
            IpAddr::from(octets)
        }
        FAMILY_IPV6 => {
            let mut octets = [0u8; 16];
            octets[..address.len().min(16)].copy_from_slice(&address[..address.len().min(16)]);
            IpAddr::from(octets)
        }
        _ => return None,
    };
    IpNetwork::new(ip, source_netmask).ok()
}
