use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mqhttp_protocol::{QoS, DEFAULT_MAX_PACKET_SIZE};
use serde::{Deserialize, Serialize};

use crate::server::params::StartParams;

pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:1883";
pub const DEFAULT_BROKER_USER: &str = "user";
pub const DEFAULT_BROKER_PASS: &str = "password";
pub const DEFAULT_HTTP_USER: &str = "try";
pub const DEFAULT_HTTP_PASS: &str = "catch";
pub const DEFAULT_HTTP_PORT: &str = "8090";
pub const DEFAULT_BROKER_LISTEN: &str = "0.0.0.0:1883";

/// Broker and publisher tuning. Every field has a default, so the TOML file
/// only needs the knobs it wants to change. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Largest packet, fixed header included, a session will decode.
    pub max_packet_size: usize,

    /// How long a fresh connection has to send CONNECT.
    #[serde(with = "seconds")]
    pub connect_timeout: Duration,

    /// Bounded queue between a session's reader and its socket writer.
    pub outbound_capacity: usize,

    #[serde(with = "seconds")]
    pub client_connect_timeout: Duration,

    #[serde(with = "seconds")]
    pub publish_timeout: Duration,

    #[serde(with = "seconds")]
    pub client_keep_alive: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,      // 256 KiB
            connect_timeout: Duration::from_secs(10),
            outbound_capacity: 1024,
            client_connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(5),
            client_keep_alive: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => Self::read_from_file(p),
            None => Ok(Self::default()),
        }
    }

    fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {:?}", path.as_ref()))?;
        let cfg: BrokerConfig =
            toml::from_str(&raw).with_context(|| "parsing broker config TOML")?;
        cfg.validate()
            .with_context(|| format!("invalid broker config {:?}", path.as_ref()))?;
        Ok(cfg)
    }

    /// Every size and duration must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.outbound_capacity == 0 {
            bail!("outbound_capacity must be at least 1");
        }
        if self.max_packet_size == 0 {
            bail!("max_packet_size must be at least 1");
        }
        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("client_connect_timeout", self.client_connect_timeout),
            ("publish_timeout", self.publish_timeout),
            ("client_keep_alive", self.client_keep_alive),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                bail!("{} must be at least 1 second", name);
            }
        }
        Ok(())
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Startup parameters of the bridge. Built once in `main` and shared
/// read-only afterwards; every string field is non-empty.
#[derive(Clone)]
pub struct BridgeConfig {
    pub broker_url: String,
    pub broker_user: String,
    pub broker_pass: String,
    pub http_user: String,
    pub http_pass: String,
    pub http_port: String,
    pub broker_listen: String,
    pub publish_qos: QoS,
    pub tuning: BrokerConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            broker_user: DEFAULT_BROKER_USER.to_string(),
            broker_pass: DEFAULT_BROKER_PASS.to_string(),
            http_user: DEFAULT_HTTP_USER.to_string(),
            http_pass: DEFAULT_HTTP_PASS.to_string(),
            http_port: DEFAULT_HTTP_PORT.to_string(),
            broker_listen: DEFAULT_BROKER_LISTEN.to_string(),
            publish_qos: QoS::AtMostOnce,
            tuning: BrokerConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn from_params(params: StartParams) -> Result<Self> {
        let publish_qos = QoS::try_from(params.mqtt_qos)
            .map_err(|_| anyhow::anyhow!("invalid MQTT QoS {}", params.mqtt_qos))?;
        let tuning = BrokerConfig::load_or_default(params.config.as_deref())?;

        let config = Self {
            broker_url: or_default(params.mqtt_host, DEFAULT_BROKER_URL),
            broker_user: or_default(params.mqtt_user, DEFAULT_BROKER_USER),
            broker_pass: or_default(params.mqtt_pass, DEFAULT_BROKER_PASS),
            http_user: or_default(params.username, DEFAULT_HTTP_USER),
            http_pass: or_default(params.password, DEFAULT_HTTP_PASS),
            http_port: or_default(params.port, DEFAULT_HTTP_PORT),
            broker_listen: or_default(params.mqtt_listen, DEFAULT_BROKER_LISTEN),
            publish_qos,
            tuning,
        };
        config.http_addr()?;
        Ok(config)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        let port: u16 = self
            .http_port
            .parse()
            .with_context(|| format!("invalid HTTP port {:?}", self.http_port))?;
        Ok(SocketAddr::from(([0, 0, 0, 0], port)))
    }
}

// Passwords stay out of the startup log.
impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("broker_url", &self.broker_url)
            .field("broker_user", &self.broker_user)
            .field("http_user", &self.http_user)
            .field("http_port", &self.http_port)
            .field("broker_listen", &self.broker_listen)
            .field("publish_qos", &self.publish_qos)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

fn or_default(value: String, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn params() -> StartParams {
        StartParams {
            mqtt_host: DEFAULT_BROKER_URL.into(),
            mqtt_user: DEFAULT_BROKER_USER.into(),
            mqtt_pass: DEFAULT_BROKER_PASS.into(),
            username: DEFAULT_HTTP_USER.into(),
            password: DEFAULT_HTTP_PASS.into(),
            port: DEFAULT_HTTP_PORT.into(),
            mqtt_listen: DEFAULT_BROKER_LISTEN.into(),
            mqtt_qos: 0,
            config: None,
        }
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let mut p = params();
        p.mqtt_user = String::new();
        p.password = "   ".into();
        p.port = String::new();

        let config = BridgeConfig::from_params(p).unwrap();
        assert_eq!(config.broker_user, "user");
        assert_eq!(config.http_pass, "catch");
        assert_eq!(config.http_addr().unwrap().port(), 8090);
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let mut p = params();
        p.port = "http".into();
        assert!(BridgeConfig::from_params(p).is_err());
    }

    #[test]
    fn debug_output_hides_passwords() {
        let mut config = BridgeConfig::default();
        config.http_pass = "hunter2".into();
        config.broker_pass = "s3cret".into();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "publish_timeout = 2\noutbound_capacity = 16").unwrap();

        let cfg = BrokerConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(cfg.publish_timeout, Duration::from_secs(2));
        assert_eq!(cfg.outbound_capacity, 16);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
    }

    #[test]
    fn zero_sizes_and_durations_are_rejected() {
        for line in [
            "client_keep_alive = 0",
            "connect_timeout = 0",
            "client_connect_timeout = 0",
            "publish_timeout = 0",
            "max_packet_size = 0",
            "outbound_capacity = 0",
        ] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "{}", line).unwrap();

            let err = BrokerConfig::load_or_default(Some(file.path())).unwrap_err();
            let field = line.split(' ').next().unwrap();
            assert!(format!("{:#}", err).contains(field), "{}: {:#}", line, err);
        }
    }

    #[test]
    fn defaults_pass_validation() {
        BrokerConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = BrokerConfig::load_or_default(Some("/nonexistent/mqhttp.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn no_file_means_defaults() {
        let cfg = BrokerConfig::load_or_default(None::<&str>).unwrap();
        assert_eq!(cfg, BrokerConfig::default());
    }
}
