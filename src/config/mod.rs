use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalingError};

const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub rooms: RoomConfig,
    pub ice: IceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Lifetime policy for rooms nobody is using
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub max_idle: Duration,
    pub sweep_interval: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// ICE servers handed to peer connections on both ends of a stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: Vec::new(),
        }
    }
}

impl IceConfig {
    pub fn from_env() -> Self {
        let stun_server =
            env::var("STUN_SERVER_URL").unwrap_or_else(|_| DEFAULT_STUN_SERVER.to_string());

        let mut turn_servers = vec![];

        if let (Ok(turn_url), Ok(username), Ok(credential)) = (
            env::var("TURN_SERVER_URL"),
            env::var("TURN_USERNAME"),
            env::var("TURN_CREDENTIAL"),
        ) {
            turn_servers.push(TurnServer {
                urls: vec![turn_url],
                username,
                credential,
            });
        }

        Self {
            stun_servers: vec![stun_server],
            turn_servers,
        }
    }
}

/// An entry of `RTCConfiguration.iceServers` as browsers expect it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceConfig {
    /// STUN entries first, then TURN entries with their credentials.
    pub fn browser_servers(&self) -> Vec<BrowserIceServer> {
        let stun = self.stun_servers.iter().map(|url| BrowserIceServer {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        });
        let turn = self.turn_servers.iter().map(|turn| BrowserIceServer {
            urls: turn.urls.clone(),
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
        stun.chain(turn).collect()
    }

    /// Rebuilds the relay's configuration from what `GET /config` served.
    /// Entries carrying credentials are TURN servers.
    pub fn from_browser_servers(servers: Vec<BrowserIceServer>) -> Self {
        let mut config = Self {
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
        };
        for server in servers {
            match (server.username, server.credential) {
                (Some(username), Some(credential)) => config.turn_servers.push(TurnServer {
                    urls: server.urls,
                    username,
                    credential,
                }),
                _ => config.stun_servers.extend(server.urls),
            }
        }
        config
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000)?,
            },
            rooms: RoomConfig {
                max_idle: Duration::from_secs(parse_var("ROOM_MAX_IDLE_SECS", 24 * 60 * 60)?),
                sweep_interval: Duration::from_secs(parse_var("ROOM_SWEEP_INTERVAL_SECS", 60 * 60)?),
            },
            ice: IceConfig::from_env(),
            logging: LoggingConfig {
                json: env::var("LOG_FORMAT")
                    .map(|format| format.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
        })
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            SignalingError::InvalidConfiguration(format!("{} has invalid value {:?}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_host(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
            },
            rooms: RoomConfig::default(),
            ice: IceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_parse_localhost() {
        let config = config_with_host("localhost", 3000);
        assert_eq!(config.bind_address(), ([127, 0, 0, 1], 3000));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let config = config_with_host("192.168.1.1", 3000);
        assert_eq!(config.bind_address(), ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_empty_host() {
        let config = config_with_host("", 8080);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 8080));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let config = config_with_host("invalid-hostname", 9000);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 9000));
    }

    #[test]
    fn test_room_defaults() {
        let rooms = RoomConfig::default();
        assert_eq!(rooms.max_idle, Duration::from_secs(86_400));
        assert_eq!(rooms.sweep_interval, Duration::from_secs(3_600));
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("CLASSROOM_TEST_BAD_PORT", "eighty");
        let result = parse_var::<u16>("CLASSROOM_TEST_BAD_PORT", 3000);
        assert!(matches!(result, Err(SignalingError::InvalidConfiguration(_))));

        env::set_var("CLASSROOM_TEST_GOOD_PORT", " 4000 ");
        assert_eq!(parse_var::<u16>("CLASSROOM_TEST_GOOD_PORT", 3000).unwrap(), 4000);
        assert_eq!(parse_var::<u16>("CLASSROOM_TEST_UNSET_PORT", 3000).unwrap(), 3000);
    }

    #[test]
    fn test_default_ice_config_serializes_stun() {
        let json = serde_json::to_value(IceConfig::default()).unwrap();
        assert_eq!(json["stunServers"][0], DEFAULT_STUN_SERVER);
        assert!(json["turnServers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_browser_servers_keep_turn_credentials() {
        let served: Vec<BrowserIceServer> = serde_json::from_value(serde_json::json!([
            {"urls": ["stun:stun.example.org:3478"]},
            {"urls": ["turn:turn.example.org:3478"], "username": "classroom", "credential": "secret"}
        ]))
        .unwrap();

        let ice = IceConfig::from_browser_servers(served.clone());
        assert_eq!(ice.stun_servers, vec!["stun:stun.example.org:3478"]);
        assert_eq!(ice.turn_servers.len(), 1);
        assert_eq!(ice.turn_servers[0].urls, vec!["turn:turn.example.org:3478"]);
        assert_eq!(ice.turn_servers[0].username, "classroom");
        assert_eq!(ice.turn_servers[0].credential, "secret");

        assert_eq!(ice.browser_servers(), served);
    }
}
