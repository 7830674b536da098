use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub rate_limiting: RateLimitingConfig,
}

impl ApiConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("FAUCET_API_CONFIG").unwrap_or_else(|_| "config/faucet.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("FAUCET_API_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/faucet.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize faucet configuration")?;

        // Secrets come from the environment, never from the checked-in file.
        if let Ok(database_url) = std::env::var("FAUCET_DATABASE_URL") {
            if !database_url.is_empty() {
                config.database.url = database_url;
            }
        }
        if let Ok(private_key) = std::env::var("FAUCET_PRIVATE_KEY") {
            if !private_key.is_empty() {
                config.chain.private_key = Some(private_key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        assert!(
            !self.database.url.is_empty(),
            "Database URL must be specified"
        );
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        assert!(
            self.rate_limiting.max_requests > 0,
            "Rate limit request count must be positive"
        );
        assert!(
            self.rate_limiting.window_seconds > 0,
            "Rate limit window must be positive"
        );
        assert!(
            self.rate_limiting.window_seconds <= 86_400,
            "Rate limit window cannot exceed one day"
        );
        let key = self
            .chain
            .private_key
            .as_deref()
            .context("Faucet private key missing: set FAUCET_PRIVATE_KEY or [chain] private_key")?;
        assert!(!key.is_empty(), "Faucet private key must be non-empty");
        let _ = self.chain.reconnect_delay();
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

/// Which network the faucet dispenses on. Each variant carries a
/// compiled-in gateway endpoint and chain ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn gateway_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "wss://ethereum-rpc.publicnode.com",
            Network::Testnet => "wss://ethereum-sepolia-rpc.publicnode.com",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Testnet => 11_155_111,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub network: Network,
    /// Overrides the compiled-in gateway endpoint for the selected network.
    pub gateway_url: Option<String>,
    /// Hex-encoded faucet account key; normally injected via FAUCET_PRIVATE_KEY.
    pub private_key: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
}

impl ChainConfig {
    pub fn gateway_url(&self) -> &str {
        let url = self
            .gateway_url
            .as_deref()
            .unwrap_or_else(|| self.network.gateway_url());
        assert!(!url.is_empty(), "Gateway URL must be non-empty");
        url
    }

    pub fn reconnect_delay(&self) -> Duration {
        let millis = self.reconnect_delay_ms.unwrap_or(10_000);
        assert!(millis >= 100, "Reconnect delay must be at least 100ms");
        assert!(millis <= 300_000, "Reconnect delay cannot exceed 5 minutes");
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitingConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl RateLimitingConfig {
    pub fn window(&self) -> Duration {
        assert!(self.window_seconds > 0, "Rate limit window invariant broken");
        Duration::from_secs(self.window_seconds)
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_constants() {
        assert_ne!(Network::Mainnet.chain_id(), Network::Testnet.chain_id());
        assert!(Network::Mainnet.gateway_url().starts_with("wss://"));
        assert!(Network::Testnet.gateway_url().starts_with("wss://"));
    }

    #[test]
    fn gateway_override_wins() {
        let chain = ChainConfig {
            network: Network::Testnet,
            gateway_url: Some("wss://gateway.example.org".to_string()),
            private_key: None,
            reconnect_delay_ms: None,
        };
        assert_eq!(chain.gateway_url(), "wss://gateway.example.org");
    }

    #[test]
    fn reconnect_delay_default() {
        let chain = ChainConfig {
            network: Network::Testnet,
            gateway_url: None,
            private_key: None,
            reconnect_delay_ms: None,
        };
        assert_eq!(chain.reconnect_delay(), Duration::from_secs(10));
    }

    #[test]
    fn server_address_defaults_to_localhost() {
        let server = ServerConfig {
            host: None,
            port: 8080,
        };
        assert_eq!(server.address().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn server_address_accepts_max_port() {
        let server = ServerConfig {
            host: None,
            port: 65535,
        };
        assert_eq!(server.address().port(), 65535);
    }
}
