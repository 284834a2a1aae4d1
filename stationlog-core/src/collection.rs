use serde::{Deserialize, Serialize};

/// Session-scoped state of a foreground collector. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStatus {
    pub is_active: bool,
    /// Completion time of the last successful collection.
    pub last_collection: Option<jiff::Timestamp>,
    /// Arrival time of the last tick that started a collection.
    pub last_tick: Option<jiff::Timestamp>,
    pub success_count: u64,
    pub error_count: u64,
    pub current_interval_ms: u64,
}

impl CollectionStatus {
    /// Projects the status into the contract consumed by the status widget.
    pub fn view(&self) -> CollectionStatusView {
        let interval = jiff::SignedDuration::from_millis(self.current_interval_ms as i64);
        let next_scheduled = if self.is_active {
            self.last_tick.and_then(|tick| tick.checked_add(interval).ok())
        } else {
            None
        };

        CollectionStatusView {
            is_active: self.is_active,
            last_collection: self.last_collection,
            next_scheduled,
            success_count: self.success_count,
            error_count: self.error_count,
            interval_minutes: self.current_interval_ms as f64 / 60_000.0,
        }
    }
}

/// Wire shape of the collection status widget contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatusView {
    pub is_active: bool,
    pub last_collection: Option<jiff::Timestamp>,
    pub next_scheduled: Option<jiff::Timestamp>,
    pub success_count: u64,
    pub error_count: u64,
    pub interval_minutes: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_scheduled_follows_last_tick_while_active() {
        let tick = jiff::Timestamp::from_second(1_000).unwrap();
        let status = CollectionStatus {
            is_active: true,
            last_tick: Some(tick),
            current_interval_ms: 300_000,
            ..Default::default()
        };

        let view = status.view();
        assert_eq!(
            view.next_scheduled,
            Some(jiff::Timestamp::from_second(1_300).unwrap())
        );
        assert_eq!(view.interval_minutes, 5.0);
    }

    #[test]
    fn inactive_status_has_no_next_tick() {
        let status = CollectionStatus {
            is_active: false,
            last_tick: Some(jiff::Timestamp::from_second(1_000).unwrap()),
            current_interval_ms: 60_000,
            ..Default::default()
        };

        assert_eq!(status.view().next_scheduled, None);
    }

    #[test]
    fn view_serializes_camel_case() {
        let json = serde_json::to_value(CollectionStatus::default().view()).unwrap();
        assert!(json.get("isActive").is_some());
        assert!(json.get("intervalMinutes").is_some());
        assert!(json.get("nextScheduled").is_some());
    }
}
