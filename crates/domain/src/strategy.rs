use std::fmt;
use std::str::FromStr;

/// Per-query address-family policy.
///
/// Controls which families are queried, which addresses survive
/// filtering, and how a merged result list is ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DomainStrategy {
    /// Query both families, return whatever the upstream sent.
    #[default]
    AsIs,
    /// Query both families, IPv4 results first.
    PreferIpv4,
    /// Query both families, IPv6 results first.
    PreferIpv6,
    /// Query and return IPv4 only.
    UseIpv4,
    /// Query and return IPv6 only.
    UseIpv6,
}

impl DomainStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStrategy::AsIs => "as_is",
            DomainStrategy::PreferIpv4 => "prefer_ipv4",
            DomainStrategy::PreferIpv6 => "prefer_ipv6",
            DomainStrategy::UseIpv4 => "ipv4_only",
            DomainStrategy::UseIpv6 => "ipv6_only",
        }
    }
}

impl fmt::Display for DomainStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "as_is" => Ok(DomainStrategy::AsIs),
            "prefer_ipv4" => Ok(DomainStrategy::PreferIpv4),
            "prefer_ipv6" => Ok(DomainStrategy::PreferIpv6),
            "ipv4_only" => Ok(DomainStrategy::UseIpv4),
            "ipv6_only" => Ok(DomainStrategy::UseIpv6),
            other => Err(format!("unknown domain strategy: '{}'", other)),
        }
    }
}
