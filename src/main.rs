use imu_paddle::domain::settings::SettingsService;
use imu_paddle::infrastructure::bluetooth::simulated::SimulatedTransport;
use imu_paddle::infrastructure::bluetooth::TrackerService;
use imu_paddle::infrastructure::logging::init_logger;
use std::time::{Duration, Instant};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _logging_guard = init_logger(&settings.log_settings)?;
    info!(path = %settings_service.path().display(), "Starting IMU paddle tracker");

    let transports =
        (0..settings.source_count.max(1)).map(|index| SimulatedTransport::swinging(&settings.link, index));
    let mut service = TrackerService::new(&settings, transports);
    service.start(Instant::now());

    let mut ticker = tokio::time::interval(Duration::from_millis(settings.tick_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut report = tokio::time::interval(Duration::from_millis(500));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                service.tick(Instant::now());
            }
            _ = report.tick() => {
                for source in service.source_ids() {
                    match service.position(source).filter(|_| service.has_valid_data(source)) {
                        Some(position) => info!(%source, "Position {:.3}", position),
                        None => {
                            let status = service.status(source).map(|s| s.describe()).unwrap_or_default();
                            info!(%source, "{}", status);
                        }
                    }
                }
            }
            result = &mut shutdown => {
                result?;
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    service.shutdown();
    Ok(())
}
