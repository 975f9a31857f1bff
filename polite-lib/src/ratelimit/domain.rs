use std::fmt;
use url::{Host, Url};

use crate::ErrorKind;
use crate::types::Result;

/// The destination a request is rate limited under.
///
/// By default this is the registrable domain of the request URL without its
/// public suffix, so that every subdomain and every country-code variant of a
/// site shares one limit.
///
/// # Examples
///
/// ```
/// use polite_lib::ratelimit::DomainKey;
/// use url::Url;
///
/// let url = Url::parse("https://a.b.example.com/x").unwrap();
/// let key = DomainKey::try_from(&url).unwrap();
/// assert_eq!(key.as_str(), "example");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainKey(String);

impl DomainKey {
    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Key a request by its full hostname instead of its registrable domain
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidUrlHost`] if the URL has no host.
    pub fn from_host(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or(ErrorKind::InvalidUrlHost)?;
        Ok(Self::from(host))
    }
}

impl TryFrom<&Url> for DomainKey {
    type Error = ErrorKind;

    fn try_from(url: &Url) -> Result<Self> {
        match url.host().ok_or(ErrorKind::InvalidUrlHost)? {
            Host::Ipv4(address) => Ok(DomainKey(address.to_string())),
            Host::Ipv6(address) => Ok(DomainKey(address.to_string())),
            Host::Domain(domain) => Ok(DomainKey(registrable_label(&domain.to_lowercase()))),
        }
    }
}

impl TryFrom<Url> for DomainKey {
    type Error = ErrorKind;

    fn try_from(url: Url) -> Result<Self> {
        DomainKey::try_from(&url)
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DomainKey {
    fn from(key: String) -> Self {
        DomainKey(key.to_lowercase())
    }
}

impl From<&str> for DomainKey {
    fn from(key: &str) -> Self {
        DomainKey(key.to_lowercase())
    }
}

/// Strip subdomains and the public suffix from a hostname:
/// `a.b.example.co.uk` becomes `example`.
///
/// Hosts which are a public suffix themselves or have no
/// suffix at all (e.g. `localhost`) are kept as they are.
fn registrable_label(host: &str) -> String {
    let host = host.trim_end_matches('.');
    match (psl::domain_str(host), psl::suffix_str(host)) {
        (Some(domain), Some(suffix)) if domain.len() > suffix.len() => {
            domain[..domain.len() - suffix.len() - 1].to_string()
        }
        _ => host.to_string(),
    }
}

/// Maps a request URL to the destination it is rate limited under.
///
/// Implementations must be pure: the same URL always resolves to the same key.
pub trait DomainResolver: Send + Sync + fmt::Debug {
    /// Resolve the destination key of `url`
    ///
    /// # Errors
    ///
    /// Returns an error if no destination can be derived from the URL,
    /// e.g. because it has no host.
    fn resolve(&self, url: &Url) -> Result<DomainKey>;
}

/// Groups requests by registrable domain (the default).
/// See [`DomainKey`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrableDomain;

impl DomainResolver for RegistrableDomain {
    fn resolve(&self, url: &Url) -> Result<DomainKey> {
        DomainKey::try_from(url)
    }
}

/// Groups requests by their full hostname, so `api.github.com` and
/// `www.github.com` are limited independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostName;

impl DomainResolver for HostName {
    fn resolve(&self, url: &Url) -> Result<DomainKey> {
        DomainKey::from_host(url)
    }
}
