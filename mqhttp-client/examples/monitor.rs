use mqhttp_client::{ConnectOptions, MqttClient, QoS};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("mqhttp sensor monitor");
    println!("=====================\n");

    let options = ConnectOptions::new("mqhttp-monitor").with_credentials("user", "password");
    let mut client = MqttClient::connect("127.0.0.1:1883", &options).await?;
    println!("Connected to broker at 127.0.0.1:1883\n");

    let filter = "sensor/#";
    let granted = client.subscribe(filter, QoS::AtMostOnce).await?;
    println!("Subscribed to {} (granted {:?})\n", filter, granted);

    loop {
        let publish = client.recv().await?;
        println!(
            "{:<24} {}{}",
            publish.topic,
            String::from_utf8_lossy(&publish.payload),
            if publish.retain { "  (retained)" } else { "" }
        );
    }
}
