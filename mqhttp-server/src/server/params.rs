use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{
    DEFAULT_BROKER_LISTEN, DEFAULT_BROKER_PASS, DEFAULT_BROKER_URL, DEFAULT_BROKER_USER,
    DEFAULT_HTTP_PASS, DEFAULT_HTTP_PORT, DEFAULT_HTTP_USER,
};

#[derive(Parser, Debug)]
#[command(name = "mqhttp", version, about = "Makes a bridge from HTTP to MQTT")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Starts the embedded broker and the HTTP gateway
    #[command(visible_alias = "s")]
    Start(StartParams),
}

#[derive(Args, Debug, Clone)]
pub struct StartParams {
    /// MQTT host address the internal publisher connects to
    #[arg(long = "mqtt-host", visible_alias = "mh", env = "MQTT_HOST", default_value = DEFAULT_BROKER_URL)]
    pub mqtt_host: String,

    #[arg(long = "mqtt-user", visible_alias = "mu", env = "MQTT_USER", default_value = DEFAULT_BROKER_USER)]
    pub mqtt_user: String,

    #[arg(long = "mqtt-pass", visible_alias = "mp", env = "MQTT_PASS", default_value = DEFAULT_BROKER_PASS)]
    pub mqtt_pass: String,

    /// Basic auth username for POST /publish
    #[arg(short = 'u', long, env = "AUTH_USERNAME", default_value = DEFAULT_HTTP_USER)]
    pub username: String,

    /// Basic auth password for POST /publish
    #[arg(short = 'p', long, env = "AUTH_PASSWORD", default_value = DEFAULT_HTTP_PASS)]
    pub password: String,

    #[arg(long, env = "PORT", default_value = DEFAULT_HTTP_PORT)]
    pub port: String,

    /// Address the embedded broker listens on
    #[arg(long = "mqtt-listen", env = "MQTT_LISTEN", default_value = DEFAULT_BROKER_LISTEN)]
    pub mqtt_listen: String,

    /// QoS used when relaying HTTP writes into the broker
    #[arg(long = "mqtt-qos", env = "MQTT_QOS", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub mqtt_qos: u8,

    /// Optional TOML file with broker tuning
    #[arg(long, env = "MQHTTP_CONFIG")]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_alias_and_short_flags() {
        let cli = Cli::try_parse_from(["mqhttp", "s", "-u", "admin", "-p", "pw", "--mh", "tcp://broker:1883"])
            .unwrap();
        let Some(Command::Start(params)) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(params.username, "admin");
        assert_eq!(params.password, "pw");
        assert_eq!(params.mqtt_host, "tcp://broker:1883");
    }

    #[test]
    fn no_subcommand_parses_to_none() {
        let cli = Cli::try_parse_from(["mqhttp"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn qos_above_two_is_rejected() {
        assert!(Cli::try_parse_from(["mqhttp", "start", "--mqtt-qos", "3"]).is_err());
    }
}
