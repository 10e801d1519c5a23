use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SECURE_PORT: u16 = 8443;
pub const DEFAULT_HOST: &str = "localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    pub fn for_page(secure: bool) -> Self {
        if secure { Scheme::Wss } else { Scheme::Ws }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Ws => DEFAULT_PORT,
            Scheme::Wss => DEFAULT_SECURE_PORT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = if host.is_empty() {
            DEFAULT_HOST.to_string()
        } else {
            host
        };
        Self { scheme, host, port }
    }

    /// Scheme and port follow whether the hosting page was loaded securely.
    pub fn for_page(secure: bool, host: impl Into<String>) -> Self {
        let scheme = Scheme::for_page(secure);
        Self::new(scheme, host, scheme.default_port())
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::for_page(false, DEFAULT_HOST)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Endpoint(s.to_string());

        let (scheme, rest) = match s.split_once("://") {
            Some(("ws", rest)) => (Scheme::Ws, rest),
            Some(("wss", rest)) => (Scheme::Wss, rest),
            Some(_) => return Err(invalid()),
            None => (Scheme::Ws, s),
        };

        let authority = rest.trim_end_matches('/');
        if authority.is_empty() || authority.contains('/') {
            return Err(invalid());
        }

        // A bracketed IPv6 literal carries its own colons.
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !authority.ends_with(']') => (host, Some(port)),
            _ => (authority, None),
        };
        if !is_valid_host(host) {
            return Err(invalid());
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => scheme.default_port(),
        };
        Ok(Self::new(scheme, host, port))
    }
}

fn is_valid_host(host: &str) -> bool {
    match host.strip_prefix('[') {
        Some(literal) => literal
            .strip_suffix(']')
            .is_some_and(|ip| !ip.is_empty() && !ip.contains(['[', ']'])),
        None => !host.is_empty() && !host.contains([':', '[', ']']),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_security_selects_scheme_and_port() {
        let plain = Endpoint::for_page(false, "robot.local");
        assert_eq!(plain.url(), "ws://robot.local:8080");

        let secure = Endpoint::for_page(true, "robot.local");
        assert_eq!(secure.url(), "wss://robot.local:8443");
    }

    #[test]
    fn test_empty_host_falls_back_to_localhost() {
        let endpoint = Endpoint::for_page(false, "");
        assert_eq!(endpoint.host(), "localhost");
    }

    #[test]
    fn test_parse_endpoint() {
        let endpoint: Endpoint = "wss://10.0.0.5:9000".parse().unwrap();
        assert_eq!(endpoint.scheme(), Scheme::Wss);
        assert_eq!(endpoint.host(), "10.0.0.5");
        assert_eq!(endpoint.port(), 9000);

        let endpoint: Endpoint = "robot".parse().unwrap();
        assert_eq!(endpoint.url(), "ws://robot:8080");

        let endpoint: Endpoint = "wss://robot/".parse().unwrap();
        assert_eq!(endpoint.port(), 8443);
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let endpoint: Endpoint = "ws://[::1]".parse().unwrap();
        assert_eq!(endpoint.host(), "[::1]");
        assert_eq!(endpoint.port(), 8080);
        assert_eq!(endpoint.url(), "ws://[::1]:8080");

        let endpoint: Endpoint = "wss://[fe80::2]:9000/".parse().unwrap();
        assert_eq!(endpoint.host(), "[fe80::2]");
        assert_eq!(endpoint.port(), 9000);

        assert!("ws://::1".parse::<Endpoint>().is_err());
        assert!("ws://[::1".parse::<Endpoint>().is_err());
        assert!("ws://[]".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("http://robot:80".parse::<Endpoint>().is_err());
        assert!("ws://robot:notaport".parse::<Endpoint>().is_err());
        assert!("ws://:8080".parse::<Endpoint>().is_err());
        assert!("ws://robot:8080/path".parse::<Endpoint>().is_err());
        assert!("ws://robot:".parse::<Endpoint>().is_err());
    }
}
