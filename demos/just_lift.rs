use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};
use vitruvian_ble::{Result, SessionState, Trainer, WorkoutParameters};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏋️ Vitruvian Just Lift Example");
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

    // Grab the handles to start, put them down for 3 seconds to stop
    trainer
        .enable_auto_start_detection(WorkoutParameters::just_lift(15.0))
        .await?;
    info!("🤲 Grab the handles to start lifting");

    let mut states = trainer.subscribe_session_state();
    let mut reps = trainer.subscribe_rep_count();
    let mut summaries = trainer.subscribe_summaries();

    let session = async {
        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    info!("📍 {}", state);
                    if let SessionState::Error(message) = state {
                        warn!("Session failed: {}", message);
                        break;
                    }
                }
                changed = reps.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let count = *reps.borrow_and_update();
                    if count.total() > 0 {
                        info!("💪 Reps: {} warmup, {} working", count.warmup_reps, count.working_reps);
                    }
                }
                summary = summaries.recv() => {
                    if let Ok(summary) = summary {
                        info!(
                            "📋 Set done: {} reps in {:.0}s",
                            summary.total_reps,
                            summary.duration.as_secs_f32()
                        );
                        break;
                    }
                }
            }
        }
    };

    // One set, or give up after ten minutes
    if timeout(Duration::from_secs(600), session).await.is_err() {
        warn!("⏰ No set finished in time");
    }

    info!("🛑 Stopping...");
    if let Err(e) = trainer.stop_workout().await {
        error!("❌ Stop failed, retrying once: {}", e);
        trainer.stop_workout().await?;
    }

    trainer.shutdown().await?;
    info!("👋 Disconnected");
    Ok(())
}
