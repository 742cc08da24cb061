use crate::error::ClientError;

pub const DEFAULT_CLIENT_NAME: &str = "canopy";
pub const DEFAULT_URL: &str = "/";

/// What the client tells the server about itself during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_name: String,
    pub client_version: String,
    /// The page the server should render.
    pub url: String,
    pub ticket: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            url: DEFAULT_URL.to_string(),
            ticket: None,
        }
    }
}

impl ClientConfig {
    /// Reads `CANOPY_CLIENT_NAME`, `CANOPY_CLIENT_VERSION`, `CANOPY_URL` and `CANOPY_TICKET`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let mut config = Self::default();

        if let Some(name) = lookup("CANOPY_CLIENT_NAME") {
            if name.trim().is_empty() {
                tracing::warn!("ignoring empty CANOPY_CLIENT_NAME");
            } else {
                config.client_name = name;
            }
        }
        if let Some(version) = lookup("CANOPY_CLIENT_VERSION").filter(|v| !v.trim().is_empty()) {
            config.client_version = version;
        }
        if let Some(url) = lookup("CANOPY_URL") {
            if url.trim().is_empty() {
                return Err(ClientError::Config("CANOPY_URL is set but empty".to_string()));
            }
            config.url = url;
        }
        config.ticket = lookup("CANOPY_TICKET").filter(|t| !t.is_empty());

        Ok(config)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.ticket = Some(ticket.into());
        self
    }
}
