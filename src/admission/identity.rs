//! Derivation of the rate-limit key from an incoming request.

use {
    crate::{
        Result,
        config::{AdmissionConfig, IdentitySourceConfig},
        ratelimit::RateLimitKey,
    },
    axum::extract::ConnectInfo,
    http::{Extensions, HeaderMap, HeaderName},
    std::net::SocketAddr,
};

/// Longest header value accepted as an identity. Longer values are ignored
/// so that a client cannot blow up key sizes in the shared store.
const MAX_IDENTITY_LEN: usize = 256;

/// Key used when no source yields an identity.
pub const FALLBACK_ADDR: &str = "127.0.0.1";

/// One place a caller identity can be read from.
pub trait IdentitySource: Send + Sync + 'static {
    fn identify(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<RateLimitKey>;
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    (!value.is_empty() && value.len() <= MAX_IDENTITY_LEN).then_some(value)
}

/// Authenticated user id set by an upstream authentication layer.
#[derive(Debug, Clone)]
pub struct IdentityHeader {
    header: HeaderName,
}

impl IdentityHeader {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl IdentitySource for IdentityHeader {
    fn identify(&self, headers: &HeaderMap, _: &Extensions) -> Option<RateLimitKey> {
        header_str(headers, &self.header).map(|id| RateLimitKey::User(id.to_string()))
    }
}

/// Client address reported by a proxy header. List-valued headers
/// (`x-forwarded-for` and friends) contribute their first entry, which is the
/// original client.
#[derive(Debug, Clone)]
pub struct AddressHeader {
    header: HeaderName,
}

impl AddressHeader {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    pub fn forwarded_for() -> Self {
        Self::new(HeaderName::from_static("x-forwarded-for"))
    }

    pub fn real_ip() -> Self {
        Self::new(HeaderName::from_static("x-real-ip"))
    }

    pub fn platform_forwarded_for() -> Self {
        Self::new(HeaderName::from_static("x-vercel-forwarded-for"))
    }

    pub fn cdn_client_ip() -> Self {
        Self::new(HeaderName::from_static("cf-connecting-ip"))
    }
}

impl IdentitySource for AddressHeader {
    fn identify(&self, headers: &HeaderMap, _: &Extensions) -> Option<RateLimitKey> {
        let value = header_str(headers, &self.header)?;
        let first = value.split(',').next()?.trim();
        (!first.is_empty()).then(|| RateLimitKey::Ip(first.to_string()))
    }
}

/// Peer address of the TCP connection, available when the server is started
/// with `into_make_service_with_connect_info::<SocketAddr>()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionAddress;

impl IdentitySource for ConnectionAddress {
    fn identify(&self, _: &HeaderMap, extensions: &Extensions) -> Option<RateLimitKey> {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| RateLimitKey::Ip(addr.ip().to_string()))
    }
}

/// Ordered identity sources. The first source that yields a key wins.
pub struct IdentityChain {
    sources: Vec<Box<dyn IdentitySource>>,
}

impl IdentityChain {
    pub fn new(sources: Vec<Box<dyn IdentitySource>>) -> Self {
        Self { sources }
    }

    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        let identity_header = HeaderName::try_from(config.identity_header.as_str())?;
        let sources = config
            .identity_sources
            .iter()
            .map(|source| -> Box<dyn IdentitySource> {
                match source {
                    IdentitySourceConfig::IdentityHeader => {
                        Box::new(IdentityHeader::new(identity_header.clone()))
                    }
                    IdentitySourceConfig::ForwardedFor => Box::new(AddressHeader::forwarded_for()),
                    IdentitySourceConfig::RealIp => Box::new(AddressHeader::real_ip()),
                    IdentitySourceConfig::PlatformForwardedFor => {
                        Box::new(AddressHeader::platform_forwarded_for())
                    }
                    IdentitySourceConfig::CdnClientIp => Box::new(AddressHeader::cdn_client_ip()),
                    IdentitySourceConfig::Connection => Box::new(ConnectionAddress),
                }
            })
            .collect();
        Ok(Self::new(sources))
    }

    pub fn derive(&self, headers: &HeaderMap, extensions: &Extensions) -> RateLimitKey {
        self.sources
            .iter()
            .find_map(|source| source.identify(headers, extensions))
            .unwrap_or_else(|| RateLimitKey::Ip(FALLBACK_ADDR.into()))
    }
}

impl Default for IdentityChain {
    fn default() -> Self {
        // The default config always carries a valid header name.
        Self::from_config(&AdmissionConfig::default()).unwrap_or_else(|_| Self::new(Vec::new()))
    }
}

impl std::fmt::Debug for IdentityChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityChain")
            .field("sources", &self.sources.len())
            .finish()
    }
}
