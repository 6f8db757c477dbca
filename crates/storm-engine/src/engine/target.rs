use crate::error::ConfigurationError;
use hyper::Uri;
use storm_common::TargetConfig;

/// A named cleartext HTTP endpoint that traffic is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    name: String,
    base: String,
    host: String,
    port: u16,
}

impl Target {
    pub fn new(name: impl Into<String>, base_url: &str) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let invalid = |reason: String| ConfigurationError::InvalidTarget {
            name: name.clone(),
            reason,
        };

        let uri: Uri = base_url
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| invalid(e.to_string()))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(invalid(format!("unsupported scheme `{}`", other))),
            None => return Err(invalid("missing scheme".to_string())),
        }
        let host = uri
            .host()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);

        Ok(Self {
            base: format!("http://{}:{}", host, port),
            name,
            host,
            port,
        })
    }

    pub fn from_config(cfg: &TargetConfig) -> Result<Self, ConfigurationError> {
        Self::new(cfg.name.clone(), &cfg.base_url)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, used both as the socket address and the `:authority` pseudo-header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }
}

pub fn targets_from_config(cfgs: &[TargetConfig]) -> Result<Vec<Target>, ConfigurationError> {
    if cfgs.is_empty() {
        return Err(ConfigurationError::NoTargets);
    }
    cfgs.iter().map(Target::from_config).collect()
}
