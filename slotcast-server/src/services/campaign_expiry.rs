use crate::models::now;
use crate::services::moderation;
use crate::AppState;
use std::time::Duration;
use tokio::time::interval;

/// Periodically expires approved campaigns whose `ends_at` has passed.
pub async fn run(state: AppState) {
    let mut tick = interval(Duration::from_secs(state.config.campaigns.expiry_sweep_secs));

    loop {
        tick.tick().await;

        let changes = {
            let mut conn = match state.db.get() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Campaign expiry: database connection error: {}", e);
                    continue;
                }
            };

            match moderation::expire_due(&mut conn, now()) {
                Ok(changes) => changes,
                Err(e) => {
                    tracing::error!("Campaign expiry sweep failed: {}", e);
                    continue;
                }
            }
        };

        crate::websocket::notify_changes(&state, &changes).await;
    }
}
