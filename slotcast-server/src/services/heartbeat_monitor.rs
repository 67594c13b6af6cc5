use crate::models::{is_online, now};
use crate::AppState;
use diesel::prelude::*;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::interval;

pub async fn run(state: AppState) {
    let mut tick = interval(Duration::from_secs(
        state.config.liveness.monitor_interval_secs,
    ));
    let mut online: HashSet<i32> = HashSet::new();

    loop {
        tick.tick().await;

        match check_heartbeats(&state, &online) {
            Ok(current) => online = current,
            Err(e) => tracing::error!("Heartbeat monitor error: {}", e),
        }
    }
}

/// Liveness is derived from `last_seen`, so nothing is written here; the
/// monitor only reports transitions since the previous pass.
fn check_heartbeats(state: &AppState, previous: &HashSet<i32>) -> Result<HashSet<i32>, String> {
    use crate::schema::terminals::dsl;

    let mut conn = state
        .db
        .get()
        .map_err(|_| "Database connection error".to_string())?;

    let rows: Vec<(i32, String, Option<chrono::NaiveDateTime>)> = dsl::terminals
        .select((dsl::id, dsl::name, dsl::last_seen))
        .load(&mut conn)
        .map_err(|e| e.to_string())?;

    let threshold = state.config.liveness.threshold_secs;
    let at = now();
    let current: HashSet<i32> = rows
        .iter()
        .filter(|(_, _, last_seen)| is_online(*last_seen, at, threshold))
        .map(|(id, _, _)| *id)
        .collect();

    let (went_offline, came_online) = liveness_changes(previous, &current);
    for (id, name, last_seen) in &rows {
        if went_offline.contains(id) {
            tracing::warn!(
                "Terminal {} went offline (last heartbeat {:?})",
                name,
                last_seen
            );
        } else if came_online.contains(id) {
            tracing::info!("Terminal {} is online", name);
        }
    }

    Ok(current)
}

fn liveness_changes(previous: &HashSet<i32>, current: &HashSet<i32>) -> (HashSet<i32>, HashSet<i32>) {
    let went_offline = previous.difference(current).copied().collect();
    let came_online = current.difference(previous).copied().collect();
    (went_offline, came_online)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_changes() {
        let previous: HashSet<i32> = [1, 2, 3].into_iter().collect();
        let current: HashSet<i32> = [2, 3, 4].into_iter().collect();

        let (offline, online) = liveness_changes(&previous, &current);

        assert_eq!(offline, [1].into_iter().collect());
        assert_eq!(online, [4].into_iter().collect());
    }

    #[test]
    fn test_no_changes_on_stable_fleet() {
        let fleet: HashSet<i32> = [7, 8].into_iter().collect();
        let (offline, online) = liveness_changes(&fleet, &fleet);
        assert!(offline.is_empty());
        assert!(online.is_empty());
    }
}
