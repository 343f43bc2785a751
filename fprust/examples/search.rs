//! Fingerprint search example

use fprust::{Device, MatchOutcome, SearchOutcome, TcpTransport};

#[tokio::main]
async fn main() -> fprust::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let endpoint = std::env::var("SENSOR_ENDPOINT").unwrap_or_else(|_| "192.168.1.50".to_string());

    let transport = TcpTransport::new(endpoint, 4001);
    let mut device = Device::open(transport, 0xFFFF_FFFF);

    device.connect().await?;
    device.verify_password().await?;

    println!("Place your finger on the sensor...");
    match device.search_finger().await? {
        SearchOutcome::Match { slot, score } => {
            println!("✓ Matched slot {} with score {}", slot, score);

            // Double-check against that slot alone
            match device.verify_finger(slot).await? {
                MatchOutcome::Match { score } => println!("✓ Verified (score {})", score),
                MatchOutcome::Mismatch => println!("✗ Verification disagreed"),
            }
        }
        SearchOutcome::NotFound => println!("✗ No matching finger enrolled"),
    }

    device.close().await?;
    Ok(())
}
