use futures::StreamExt;
use sunnyfit::{
    AccessoryManager, BtleplugTransport, NotificationValue, Result, ScanParams, SunnyFitError,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📊 SunnyFit Workout Monitor Example");

    let manager = AccessoryManager::new(BtleplugTransport::new().await?);
    let mut found = manager.subscribe_accessories();

    info!("Searching for accessories...");
    manager
        .scan(ScanParams {
            duration: None,
            ..ScanParams::default()
        })
        .await?;

    let accessory = match found.recv().await {
        Ok(accessory) => accessory,
        Err(e) => {
            error!("❌ Scan ended without finding an accessory: {}", e);
            return Err(SunnyFitError::Transport(e.to_string()));
        }
    };
    manager.stop_scanning().await?;
    info!("✅ Found {}", accessory);

    let mut workout = manager.start_exercise(accessory).await?;
    info!("🏃 Start moving! Press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping...");
                break;
            }
            value = workout.next() => match value {
                Some(Ok(NotificationValue::Status(status))) => println!(
                    "⏱  {:>4}s  {:>3} rpm  {:>6.1} kcal",
                    status.elapsed_seconds,
                    status.reps_per_minute,
                    status.kilocalories()
                ),
                Some(Ok(NotificationValue::Counter(counter))) => {
                    println!("🔢 {} reps", counter.reps);
                }
                Some(Ok(NotificationValue::Summary(summary))) => println!(
                    "⏱  {:>4}s  {:>5} reps  {:>6.1} kcal",
                    summary.elapsed_seconds,
                    summary.reps,
                    summary.kilocalories()
                ),
                Some(Err(e)) => {
                    warn!("⚠️ {}", e);
                    break;
                }
                None => break,
            },
        }
    }

    manager.shutdown().await?;
    info!("👋 Disconnected");
    Ok(())
}
