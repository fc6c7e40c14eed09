use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub store: Store,
    pub provider: Provider,
    pub security: Security,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// If set, this is used as the public base URL embedded in QR links and
    /// redirect URIs, e.g., https://link.example.com
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// Redis connection string, e.g. redis://127.0.0.1:6379
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// OAuth app key (client_id) registered with the provider.
    pub app_key: String,
    /// OAuth app secret. Never logged.
    pub app_secret: String,
    /// Hosted consent page the phone browser is sent to.
    pub authorize_url: String,
    /// Token endpoint for code exchange and refresh-token exchange.
    pub token_url: String,
    /// Redirect URI registered with the provider. Defaults to
    /// {public_base_url}/api/auth/callback when unset.
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    /// Server-wide secret mixed into every token digest, distinct from the
    /// per-record salt. Must be set; never persisted alongside the digests.
    pub pepper: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: None,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            app_secret: String::new(),
            authorize_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            redirect_uri: None,
        }
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            pepper: String::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default("store.url", Store::default().url)
            .into_diagnostic()?
            .set_default("provider.app_key", Provider::default().app_key)
            .into_diagnostic()?
            .set_default("provider.app_secret", Provider::default().app_secret)
            .into_diagnostic()?
            .set_default("provider.authorize_url", Provider::default().authorize_url)
            .into_diagnostic()?
            .set_default("provider.token_url", Provider::default().token_url)
            .into_diagnostic()?
            .set_default("security.pepper", Security::default().pepper)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: SYZYGY__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("SYZYGY").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let s: Settings = cfg.try_deserialize().into_diagnostic()?;

        if s.security.pepper.is_empty() {
            return Err(miette::miette!(
                "security.pepper must be set (SYZYGY__SECURITY__PEPPER or config file)"
            ));
        }

        Ok(s)
    }

    /// Public base URL without trailing slash; the QR code and redirect URIs
    /// are built from this.
    pub fn base_url(&self) -> String {
        if let Some(base) = &self.server.public_base_url {
            base.trim_end_matches('/').to_string()
        } else {
            format!("http://{}:{}", self.server.host, self.server.port)
        }
    }

    /// Redirect URI handed to the provider during authorization.
    pub fn callback_url(&self) -> String {
        if let Some(uri) = &self.provider.redirect_uri {
            uri.clone()
        } else {
            format!("{}/api/auth/callback", self.base_url())
        }
    }
}
