//! Egress proxy descriptors

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProvider {
    /// Datacenter proxies that encode the exit country in the username.
    #[default]
    Oxylabs,
    Generic,
}

impl ProxyProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oxylabs => "oxylabs",
            Self::Generic => "generic",
        }
    }
}

/// One outbound proxy.
///
/// `public_ip` stays `None` until a connectivity probe through this proxy
/// succeeds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    #[serde(default)]
    pub provider: ProxyProvider,
    pub country: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    #[serde(skip)]
    pub public_ip: Option<String>,
}

impl ProxyDescriptor {
    /// Username as sent to the upstream proxy.
    #[must_use]
    pub fn upstream_username(&self) -> String {
        match self.provider {
            ProxyProvider::Oxylabs => format!("user-{}-country-{}", self.username, self.country),
            ProxyProvider::Generic => self.username.clone(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Short label for logs and attempt records; never contains credentials.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.public_ip {
            Some(ip) => format!("{}@{} ({ip})", self.provider.as_str(), self.endpoint()),
            None => format!("{}@{}", self.provider.as_str(), self.endpoint()),
        }
    }
}

// 비밀번호는 로그에 남기지 않는다
impl fmt::Debug for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDescriptor")
            .field("provider", &self.provider)
            .field("country", &self.country)
            .field("username", &self.username)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("public_ip", &self.public_ip)
            .finish()
    }
}
