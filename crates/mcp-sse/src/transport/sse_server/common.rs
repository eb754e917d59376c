use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::error::ConfigurationError;

pub type SessionId = Arc<str>;

pub fn session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string().into()
}

pub const DEFAULT_AUTO_PING_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SseServerConfig {
    pub bind: SocketAddr,
    pub sse_path: String,
    pub post_path: String,
    /// Externally visible origin, e.g. `https://mcp.example.com`. When unset
    /// the endpoint is built from `bind`.
    pub public_base_url: Option<String>,
    pub ct: CancellationToken,
    pub sse_keep_alive: Option<Duration>,
}

impl SseServerConfig {
    pub const DEFAULT_SSE_PATH: &'static str = "/sse";
    pub const DEFAULT_POST_PATH: &'static str = "/message";

    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        ConfigurationError::check_path("sse_path", &self.sse_path)?;
        ConfigurationError::check_path("post_path", &self.post_path)?;
        if let Some(url) = &self.public_base_url {
            ConfigurationError::check_http_url("public_base_url", url)?;
        }
        Ok(())
    }

    /// Origin that endpoint urls are built on, without a trailing `/`.
    pub fn base_url(&self) -> String {
        if let Some(url) = &self.public_base_url {
            return url.trim_end_matches('/').to_owned();
        }
        let ip = match self.bind.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        format!("http://{}", SocketAddr::new(ip, self.bind.port()))
    }
}

impl Default for SseServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3001)),
            sse_path: Self::DEFAULT_SSE_PATH.to_owned(),
            post_path: Self::DEFAULT_POST_PATH.to_owned(),
            public_base_url: None,
            ct: CancellationToken::new(),
            sse_keep_alive: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let config = SseServerConfig::new("0.0.0.0:3001".parse().unwrap());
        assert_eq!(config.base_url(), "http://127.0.0.1:3001");
        let config = SseServerConfig::new("[::]:8080".parse().unwrap());
        assert_eq!(config.base_url(), "http://[::1]:8080");
        let config = SseServerConfig {
            public_base_url: Some("https://mcp.example.com/".into()),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "https://mcp.example.com");
    }

    #[test]
    fn test_validate() {
        assert!(SseServerConfig::default().validate().is_ok());
        let config = SseServerConfig {
            post_path: "message".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidPath {
                name: "post_path",
                ..
            })
        ));
        let config = SseServerConfig {
            public_base_url: Some("ftp://example.com".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| session_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
