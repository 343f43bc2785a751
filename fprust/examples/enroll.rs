//! Finger enrollment example

use fprust::{Device, EnrollConfig, SearchOutcome, TcpTransport};

#[tokio::main]
async fn main() -> fprust::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Change to your serial bridge endpoint
    let endpoint = std::env::var("SENSOR_ENDPOINT").unwrap_or_else(|_| "192.168.1.50".to_string());

    println!("Connecting to {}...", endpoint);

    let transport = TcpTransport::new(endpoint, 4001);
    let mut device = Device::open(transport, 0xFFFF_FFFF);

    device.connect().await?;
    device.verify_password().await?;
    println!("✓ Connected!");

    // Refuse to enroll a finger that is already registered
    println!("Place your finger on the sensor...");
    if let SearchOutcome::Match { slot, score } = device.search_finger().await? {
        println!("✗ Finger already enrolled in slot {} (score {})", slot, score);
        device.close().await?;
        return Ok(());
    }

    // Pick the first free slot
    let slot = match device.read_index_table().await?.first_free() {
        Some(slot) => slot,
        None => {
            println!("✗ Template library is full");
            device.close().await?;
            return Ok(());
        }
    };

    println!("Enrolling into slot {} — press the same finger twice...", slot);
    let slot = device.enroll(&EnrollConfig::new(slot)).await?;
    println!("✓ Enrolled into slot {}", slot);

    let count = device.template_count().await?;
    println!("✓ {} templates stored", count);

    device.close().await?;
    Ok(())
}
