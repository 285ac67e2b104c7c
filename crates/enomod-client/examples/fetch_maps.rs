use enomod_client::registers::RegisterMapKind;
use enomod_client::{ClientConfig, EnoOneClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_owned());
    let client = EnoOneClient::new(host, 502, 1, ClientConfig::polling());

    let version = client.check_version().await?;
    println!("api version: {}.{}", version.major, version.minor);

    for kind in RegisterMapKind::polled(false) {
        println!("{kind}: {:?}", client.fetch_kind(kind).await?);
    }
    client.close().await;
    Ok(())
}
