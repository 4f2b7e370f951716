use tracing::{error, info};
use vitruvian_ble::{
    EchoLevel, ProgramMode, Result, SessionConfig, SessionState, Trainer, TrainerConfig,
    WorkoutParameters, WorkoutType,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏋️ Vitruvian Program Workout Example");

    let config = TrainerConfig {
        session: SessionConfig {
            countdown_secs: 5,
            rest_secs: 45,
            ..Default::default()
        },
        ..Default::default()
    };

    let trainer = match Trainer::connect_first_with_config(config).await {
        Ok(trainer) => {
            info!("✅ Connected: {}", trainer.connection_state());
            trainer
        }
        Err(e) => {
            error!("❌ Failed to connect: {}", e);
            return Err(e);
        }
    };

    // Teal LEDs
    trainer.set_color_scheme(2).await?;

    let plan = vec![
        WorkoutParameters {
            workout_type: WorkoutType::Program(ProgramMode::OldSchool),
            target_reps: 8,
            weight_per_cable_kg: 12.0,
            progression_per_rep_kg: 0.5,
            warmup_target: 3,
            ..Default::default()
        },
        WorkoutParameters {
            workout_type: WorkoutType::Program(ProgramMode::TimeUnderTension),
            target_reps: 10,
            weight_per_cable_kg: 10.0,
            stop_at_top: true,
            ..Default::default()
        },
        WorkoutParameters {
            workout_type: WorkoutType::Echo {
                level: EchoLevel::Harder,
                eccentric_load_percent: 120,
            },
            target_reps: 6,
            ..Default::default()
        },
    ];

    info!("📋 Starting a {} exercise plan", plan.len());
    trainer.start_routine(plan).await?;

    let mut states = trainer.subscribe_session_state();
    let mut summaries = trainer.subscribe_summaries();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                match state {
                    SessionState::Countdown(secs) => info!("⏳ {}...", secs),
                    SessionState::Active => info!("💪 Go!"),
                    SessionState::Resting(secs, ref next) if secs % 15 == 0 => {
                        info!("😮‍💨 Rest {}s, next: {} kg", secs, next.parameters.weight_per_cable_kg);
                    }
                    SessionState::Completed => {
                        info!("🏁 Plan complete");
                        break;
                    }
                    SessionState::Error(message) => {
                        error!("❌ {}", message);
                        break;
                    }
                    _ => {}
                }
            }
            summary = summaries.recv() => {
                if let Ok(summary) = summary {
                    info!(
                        "📊 {} warmup + {} working reps, finished at {:.1} kg ({:?})",
                        summary.warmup_reps,
                        summary.working_reps,
                        summary.final_target_weight_kg,
                        summary.ended_by
                    );
                }
            }
        }
    }

    trainer.shutdown().await?;
    info!("👋 Disconnected");
    Ok(())
}
