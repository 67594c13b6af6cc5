//! Decides whether the terminal should be powered right now.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    On,
    Off,
    Auto,
}

/// Remote-controlled settings pushed by the server on connect and on change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalSettings {
    pub power_mode: PowerMode,
    pub operating_start: String,
    pub operating_end: String,
    pub operating_days: Vec<u8>,
    pub assigned_playlist_id: Option<i32>,
    pub is_monitoring: bool,
}

fn minute_of_day(value: &str) -> Option<u32> {
    let time = NaiveTime::parse_from_str(value, "%H:%M").ok()?;
    Some(time.hour() * 60 + time.minute())
}

/// Pure evaluation of the operating schedule at `at` (local wall time).
///
/// Auto mode compares at minute resolution with both ends inclusive. When the
/// start is later than the end the window wraps past midnight. Unparseable
/// bounds keep the terminal unpowered.
pub fn is_powered(settings: &TerminalSettings, at: NaiveDateTime) -> bool {
    match settings.power_mode {
        PowerMode::Off => false,
        PowerMode::On => true,
        PowerMode::Auto => {
            let weekday = at.weekday().num_days_from_sunday() as u8;
            if !settings.operating_days.contains(&weekday) {
                return false;
            }

            let (Some(start), Some(end)) = (
                minute_of_day(&settings.operating_start),
                minute_of_day(&settings.operating_end),
            ) else {
                tracing::warn!(
                    "Invalid operating window {}-{}, staying unpowered",
                    settings.operating_start,
                    settings.operating_end
                );
                return false;
            };

            let now = at.hour() * 60 + at.minute();
            if start <= end {
                now >= start && now <= end
            } else {
                now >= start || now <= end
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEdge {
    PoweredOn,
    PoweredOff,
}

/// Tracks the last evaluation so only transitions are reported.
#[derive(Debug, Default)]
pub struct EdgeTracker {
    last: Option<bool>,
}

impl EdgeTracker {
    pub fn observe(&mut self, powered: bool) -> Option<PowerEdge> {
        let previous = self.last.replace(powered);
        match (previous, powered) {
            (Some(prev), now) if prev == now => None,
            (_, true) => Some(PowerEdge::PoweredOn),
            (_, false) => Some(PowerEdge::PoweredOff),
        }
    }
}

/// Re-evaluates on every tick and settings change, publishing power edges.
pub async fn run(
    mut settings_rx: watch::Receiver<Option<TerminalSettings>>,
    power_tx: Arc<watch::Sender<bool>>,
    beat_tx: UnboundedSender<()>,
    tick_secs: u64,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(tick_secs));
    let mut edges = EdgeTracker::default();

    loop {
        let powered = match settings_rx.borrow_and_update().as_ref() {
            Some(settings) => is_powered(settings, chrono::Local::now().naive_local()),
            // Never heard from the server: keep playing whatever is cached.
            None => true,
        };

        if let Some(edge) = edges.observe(powered) {
            tracing::info!("Schedule edge: {:?}", edge);
            power_tx.send_replace(powered);
            let _ = beat_tx.send(());
        }

        tokio::select! {
            _ = tick.tick() => {}
            changed = settings_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::debug!("Schedule task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn settings(mode: PowerMode, start: &str, end: &str, days: &[u8]) -> TerminalSettings {
        TerminalSettings {
            power_mode: mode,
            operating_start: start.to_string(),
            operating_end: end.to_string(),
            operating_days: days.to_vec(),
            assigned_playlist_id: None,
            is_monitoring: false,
        }
    }

    // 2025-01-08 is a Wednesday (weekday index 3).
    fn wednesday(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 8)
            .unwrap()
            .and_hms_opt(h, m, 30)
            .unwrap()
    }

    #[test]
    fn test_manual_modes_ignore_schedule() {
        let off = settings(PowerMode::Off, "00:00", "23:59", &[0, 1, 2, 3, 4, 5, 6]);
        let on = settings(PowerMode::On, "08:00", "09:00", &[]);
        assert!(!is_powered(&off, wednesday(12, 0)));
        assert!(is_powered(&on, wednesday(3, 0)));
    }

    #[test]
    fn test_overnight_window_wraps() {
        let s = settings(PowerMode::Auto, "22:00", "06:00", &[1, 2, 3, 4, 5]);
        assert!(is_powered(&s, wednesday(23, 30)));
        assert!(is_powered(&s, wednesday(5, 0)));
        assert!(!is_powered(&s, wednesday(12, 0)));
    }

    #[test]
    fn test_window_bounds_are_inclusive_to_the_minute() {
        let s = settings(PowerMode::Auto, "08:00", "18:00", &[3]);
        assert!(is_powered(&s, wednesday(8, 0)));
        assert!(is_powered(&s, wednesday(18, 0)));
        assert!(!is_powered(&s, wednesday(18, 1)));
        assert!(!is_powered(&s, wednesday(7, 59)));
    }

    #[test]
    fn test_day_outside_operating_days() {
        let s = settings(PowerMode::Auto, "00:00", "23:59", &[0, 6]);
        assert!(!is_powered(&s, wednesday(12, 0)));
    }

    #[test]
    fn test_invalid_bounds_stay_unpowered() {
        let s = settings(PowerMode::Auto, "8am", "18:00", &[3]);
        assert!(!is_powered(&s, wednesday(12, 0)));
    }

    #[test]
    fn test_edge_tracker_reports_transitions_only() {
        let mut edges = EdgeTracker::default();
        assert_eq!(edges.observe(true), Some(PowerEdge::PoweredOn));
        assert_eq!(edges.observe(true), None);
        assert_eq!(edges.observe(false), Some(PowerEdge::PoweredOff));
        assert_eq!(edges.observe(false), None);
    }

    #[tokio::test]
    async fn test_settings_push_publishes_power_edges() {
        let (settings_tx, settings_rx) = watch::channel(Some(settings(
            PowerMode::On,
            "08:00",
            "18:00",
            &[],
        )));
        let (power_tx, power_rx) = watch::channel(false);
        let (beat_tx, mut beat_rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run(
            settings_rx,
            Arc::new(power_tx),
            beat_tx,
            3600,
            cancel.clone(),
        ));

        assert_eq!(beat_rx.recv().await, Some(()));
        assert!(*power_rx.borrow());

        settings_tx.send_replace(Some(settings(PowerMode::Off, "08:00", "18:00", &[])));
        assert_eq!(beat_rx.recv().await, Some(()));
        assert!(!*power_rx.borrow());

        // A change that keeps the terminal off is not an edge.
        let mut still_off = settings(PowerMode::Off, "08:00", "18:00", &[]);
        still_off.assigned_playlist_id = Some(7);
        settings_tx.send_replace(Some(still_off));
        settings_tx.send_replace(Some(settings(PowerMode::On, "08:00", "18:00", &[])));
        assert_eq!(beat_rx.recv().await, Some(()));
        assert!(*power_rx.borrow());
        assert!(beat_rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_settings_wire_format() {
        let s: TerminalSettings = serde_json::from_str(
            r#"{"power_mode":"auto","operating_start":"08:00","operating_end":"18:00","operating_days":[1,2],"assigned_playlist_id":4,"is_monitoring":true}"#,
        )
        .unwrap();
        assert_eq!(s.power_mode, PowerMode::Auto);
        assert_eq!(s.assigned_playlist_id, Some(4));
    }
}
