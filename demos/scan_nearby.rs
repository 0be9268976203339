use std::time::Duration;
use sunnyfit::{AccessoryManager, BtleplugTransport, Result, ScanParams};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🔍 SunnyFit Scan Example");

    let transport = match BtleplugTransport::new().await {
        Ok(transport) => transport,
        Err(e) => {
            error!("❌ No Bluetooth adapter: {}", e);
            return Err(e);
        }
    };
    let manager = AccessoryManager::new(transport);

    let params = ScanParams {
        duration: Some(Duration::from_secs(5)),
        ..ScanParams::default()
    };
    info!("Scanning for {:?}...", params.duration);
    manager.scan(params).await?;

    let accessories = manager.accessories().await;
    if accessories.is_empty() {
        info!("No SunnyFit accessories found");
        return Ok(());
    }

    for accessory in accessories {
        println!(
            "✅ {:<16} {}  ({:?} protocol)",
            accessory.accessory_type(),
            accessory.address(),
            accessory.accessory_type().generation()
        );
    }

    Ok(())
}
