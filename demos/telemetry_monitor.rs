use std::time::Duration;
use tokio::{sync::broadcast::error::RecvError, time::Instant};
use tracing::{error, info, warn};
use vitruvian_ble::{Result, Trainer, WorkoutParameters};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📊 Vitruvian Telemetry Monitor Example");
    info!("Searching for trainers...");

    let trainer = match Trainer::connect_first().await {
        Ok(trainer) => {
            info!("✅ Connected: {}", trainer.connection_state());
            trainer
        }
        Err(e) => {
            error!("❌ Failed to connect: {}", e);
            return Err(e);
        }
    };

    // Arming auto-start turns on monitor polling without loading the cables
    trainer
        .enable_auto_start_detection(WorkoutParameters::just_lift(5.0))
        .await?;

    let mut metrics = trainer.subscribe_metrics();
    let mut handles = trainer.subscribe_handle_state();
    let start_time = Instant::now();
    let mut peak_load = 0.0f32;

    info!("🔍 Monitoring for 60 seconds...");
    while start_time.elapsed() < Duration::from_secs(60) {
        tokio::select! {
            metric = metrics.recv() => match metric {
                Ok(metric) => {
                    peak_load = peak_load.max(metric.total_load());
                    println!(
                        "A {:7.1} | B {:7.1} | v {:7.1}/s | load {:5.1} kg (peak {:5.1})",
                        metric.position_a,
                        metric.position_b,
                        metric.velocity_a,
                        metric.total_load(),
                        peak_load
                    );
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} samples", skipped),
                Err(RecvError::Closed) => break,
            },
            changed = handles.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("🤲 Handles: {}", *handles.borrow_and_update());
            }
        }
    }

    trainer.disable_auto_start_detection().await?;
    trainer.stop_workout().await?;
    trainer.shutdown().await?;
    info!("👋 Disconnected");
    Ok(())
}
