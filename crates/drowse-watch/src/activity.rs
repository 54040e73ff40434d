//! Activity evaluation — when did an application last do anything?

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use drowse_control::{AppState, ControlPlane};

use crate::error::WatchResult;

/// Snapshot of an application's state and most recent activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub state: AppState,
    pub last_log: Option<SystemTime>,
    pub last_event: Option<SystemTime>,
}

impl ActivityInfo {
    /// The later of the last log line and the last platform event.
    ///
    /// `None` means no activity was ever observed.
    pub fn last_action(&self) -> Option<SystemTime> {
        match (self.last_log, self.last_event) {
            (Some(log), Some(event)) => Some(log.max(event)),
            (log, event) => log.or(event),
        }
    }

    /// Time elapsed since the last action, or `None` if there was none.
    ///
    /// Activity stamped after `now` (clock skew) counts as zero idle time.
    pub fn idle_for(&self, now: SystemTime) -> Option<Duration> {
        self.last_action()
            .map(|at| now.duration_since(at).unwrap_or_default())
    }
}

/// Derives [`ActivityInfo`] from the control plane.
#[derive(Clone)]
pub struct ActivityEvaluator {
    control: Arc<dyn ControlPlane>,
}

impl ActivityEvaluator {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        Self { control }
    }

    /// Query state, last log and last event for an application.
    ///
    /// An unknown application yields [`WatchError::AppNotFound`]; any
    /// other failure is returned as retryable without retrying here.
    ///
    /// [`WatchError::AppNotFound`]: crate::WatchError::AppNotFound
    pub async fn evaluate(&self, app_id: &str) -> WatchResult<ActivityInfo> {
        let (state, last_log, last_event) = tokio::try_join!(
            self.control.app_state(app_id),
            self.control.recent_log_timestamp(app_id),
            self.control.recent_event_timestamp(app_id),
        )?;

        Ok(ActivityInfo {
            state,
            last_log,
            last_event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use drowse_control::memory::Op;
    use drowse_control::{ControlError, InMemoryControlPlane};
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn info(log: Option<u64>, event: Option<u64>) -> ActivityInfo {
        ActivityInfo {
            state: AppState::Started,
            last_log: log.map(at),
            last_event: event.map(at),
        }
    }

    #[test]
    fn last_action_is_latest_of_both() {
        assert_eq!(info(Some(990), Some(930)).last_action(), Some(at(990)));
        assert_eq!(info(Some(880), Some(910)).last_action(), Some(at(910)));
    }

    #[test]
    fn last_action_with_one_source_missing() {
        assert_eq!(info(None, Some(930)).last_action(), Some(at(930)));
        assert_eq!(info(Some(990), None).last_action(), Some(at(990)));
        assert_eq!(info(None, None).last_action(), None);
        assert_eq!(info(None, None).idle_for(at(1000)), None);
    }

    #[test]
    fn idle_for_saturates_on_future_activity() {
        assert_eq!(info(Some(1010), None).idle_for(at(1000)), Some(Duration::ZERO));
        assert_eq!(
            info(Some(990), Some(930)).idle_for(at(1000)),
            Some(Duration::from_secs(10))
        );
    }

    #[tokio::test]
    async fn evaluate_reads_all_sources() {
        let cp = Arc::new(InMemoryControlPlane::new().with_app("x", AppState::Started));
        cp.set_last_log("x", Some(at(990)));
        let evaluator = ActivityEvaluator::new(cp.clone());

        let info = evaluator.evaluate("x").await.unwrap();
        assert_eq!(info.state, AppState::Started);
        assert_eq!(info.last_log, Some(at(990)));
        assert_eq!(info.last_event, None);
        assert_eq!(info.last_action(), Some(at(990)));
    }

    #[tokio::test]
    async fn evaluate_unknown_app_is_not_found() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let evaluator = ActivityEvaluator::new(cp);

        let err = evaluator.evaluate("ghost").await.unwrap_err();
        assert!(matches!(err, WatchError::AppNotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn evaluate_transient_failure_is_retryable() {
        let cp = Arc::new(InMemoryControlPlane::new().with_app("x", AppState::Started));
        cp.fail_next(Op::RecentEvent, ControlError::Transport("reset".into()));
        let evaluator = ActivityEvaluator::new(cp.clone());

        let err = evaluator.evaluate("x").await.unwrap_err();
        assert!(err.is_retryable());
        // Not retried at this layer.
        assert_eq!(cp.calls("x").recent_event, 1);
    }
}
