use anyhow::{Context, Result};
use clap::Parser;
use mqhttp_client::{parse_broker_url, ConnectOptions, MqttClient, QoS};

/// Publishes one reading, the way a device on the bridge would.
#[derive(Parser, Debug)]
#[command(name = "mqhttp-pub")]
struct Args {
    #[arg(long, env = "MQTT_HOST", default_value = "tcp://localhost:1883")]
    host: String,

    #[arg(long, env = "MQTT_USER", default_value = "user")]
    user: String,

    #[arg(long, env = "MQTT_PASS", default_value = "password")]
    pass: String,

    #[arg(long, default_value = "sensor/suhu")]
    topic: String,

    #[arg(long, default_value_t = 0)]
    qos: u8,

    #[arg(long)]
    retain: bool,

    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let qos = QoS::try_from(args.qos).context("qos must be 0, 1 or 2")?;
    let addr = parse_broker_url(&args.host)?;

    let options = ConnectOptions::new(format!("mqhttp-pub-{}", std::process::id()))
        .with_credentials(args.user, args.pass);
    let mut client = MqttClient::connect(&addr, &options)
        .await
        .with_context(|| format!("connecting to {}", addr))?;

    client
        .publish(&args.topic, qos, args.retain, args.message.into_bytes())
        .await
        .context("publish failed")?;
    tracing::info!(topic = %args.topic, "published");

    client.disconnect().await?;
    Ok(())
}
