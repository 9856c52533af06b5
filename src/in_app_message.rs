use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::eval::DecisionReason;

/// How late, in seconds, a schedule may still be delivered.
pub const DELIVER_WINDOW_SECONDS: i64 = 60;

/// Impressions kept per in-app message. Older impressions are evicted first.
pub const MAX_IMPRESSIONS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleTime {
    pub started_at: DateTime<Utc>,
    pub deliver_at: DateTime<Utc>,
}

impl ScheduleTime {
    /// Time left until delivery as of `at`. Negative once `deliver_at` has passed.
    pub fn delay(&self, at: DateTime<Utc>) -> Duration {
        self.deliver_at - at
    }
}

/// A pending delivery of an in-app message to the user identified by `identifiers`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InAppMessageSchedule {
    pub dispatch_id: String,
    pub in_app_message_key: i64,
    pub identifiers: HashMap<String, String>,
    pub time: ScheduleTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InAppMessageScheduleType {
    /// Scheduled right after the trigger event.
    Triggered,
    /// Re-scheduled after a delay elapsed.
    Delayed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InAppMessageScheduleRequest {
    pub schedule: InAppMessageSchedule,
    pub schedule_type: InAppMessageScheduleType,
    pub requested_at: DateTime<Utc>,
}

impl InAppMessageScheduleRequest {
    pub fn new(
        schedule: InAppMessageSchedule,
        schedule_type: InAppMessageScheduleType,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schedule,
            schedule_type,
            requested_at,
        }
    }

    pub fn delay(&self) -> Duration {
        self.schedule.time.delay(self.requested_at)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InAppMessageScheduleAction {
    Delay,
    Deliver,
    Ignore,
}

/// Decides what to do with a schedule request from its delay.
#[derive(Clone, Copy, Debug, Default)]
pub struct InAppMessageScheduleActionDeterminer;

impl InAppMessageScheduleActionDeterminer {
    pub fn new() -> Self {
        InAppMessageScheduleActionDeterminer
    }

    /// Positive delays are delayed, delays within the deliver window (inclusive) are delivered
    /// and older schedules are ignored.
    pub fn determine(
        &self,
        request: &InAppMessageScheduleRequest,
    ) -> Result<InAppMessageScheduleAction> {
        let delay = request.delay();
        let window = Duration::seconds(DELIVER_WINDOW_SECONDS);

        let action = if delay > Duration::zero() {
            InAppMessageScheduleAction::Delay
        } else if delay >= -window && delay <= Duration::zero() {
            InAppMessageScheduleAction::Deliver
        } else if delay < -window {
            InAppMessageScheduleAction::Ignore
        } else {
            return Err(Error::UndeterminableSchedule {
                dispatch_id: request.schedule.dispatch_id.clone(),
                in_app_message_key: request.schedule.in_app_message_key,
            });
        };

        debug!(
            "InAppMessage schedule action [{:?}]: dispatch_id={}, in_app_message_key={}, delay={}ms",
            action,
            request.schedule.dispatch_id,
            request.schedule.in_app_message_key,
            delay.num_milliseconds()
        );
        Ok(action)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InAppMessageScheduleCode {
    Deliver,
    Delay,
    Ignore,
    Exception,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InAppMessageScheduleResponse {
    pub dispatch_id: String,
    pub in_app_message_key: i64,
    pub code: InAppMessageScheduleCode,
}

impl InAppMessageScheduleResponse {
    pub fn of(request: &InAppMessageScheduleRequest, code: InAppMessageScheduleCode) -> Self {
        Self {
            dispatch_id: request.schedule.dispatch_id.clone(),
            in_app_message_key: request.schedule.in_app_message_key,
            code,
        }
    }
}

/// Trait for the presentation collaborator that acts on schedule actions.
pub trait InAppMessageScheduler: Send + Sync {
    fn deliver(&self, request: &InAppMessageScheduleRequest) -> Result<InAppMessageScheduleResponse>;

    fn delay(&self, request: &InAppMessageScheduleRequest) -> Result<InAppMessageScheduleResponse>;

    fn ignore(&self, request: &InAppMessageScheduleRequest) -> Result<InAppMessageScheduleResponse>;
}

/// Determines the action of a schedule request and hands it to the [InAppMessageScheduler].
pub struct InAppMessageScheduleProcessor {
    action_determiner: InAppMessageScheduleActionDeterminer,
    scheduler: Arc<dyn InAppMessageScheduler>,
}

impl InAppMessageScheduleProcessor {
    pub fn new(
        action_determiner: InAppMessageScheduleActionDeterminer,
        scheduler: Arc<dyn InAppMessageScheduler>,
    ) -> Self {
        Self {
            action_determiner,
            scheduler,
        }
    }

    /// Never fails: a determiner or scheduler error becomes an
    /// [InAppMessageScheduleCode::Exception] response.
    pub fn process(&self, request: &InAppMessageScheduleRequest) -> InAppMessageScheduleResponse {
        match self.schedule(request) {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "Failed to process InAppMessage schedule [{}]: {}",
                    request.schedule.dispatch_id, e
                );
                InAppMessageScheduleResponse::of(request, InAppMessageScheduleCode::Exception)
            }
        }
    }

    fn schedule(
        &self,
        request: &InAppMessageScheduleRequest,
    ) -> Result<InAppMessageScheduleResponse> {
        match self.action_determiner.determine(request)? {
            InAppMessageScheduleAction::Deliver => self.scheduler.deliver(request),
            InAppMessageScheduleAction::Delay => self.scheduler.delay(request),
            InAppMessageScheduleAction::Ignore => self.scheduler.ignore(request),
        }
    }
}

/// One presentation of an in-app message. Persisted as JSON; field names are part of the stored
/// format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InAppMessageImpression {
    pub identifiers: HashMap<String, String>,
    /// Seconds since the epoch.
    pub timestamp: f64,
}

/// Trait for the collaborator persisting impression histories by in-app message id.
pub trait InAppMessageImpressionStorage: Send + Sync {
    fn get(&self, in_app_message_id: i64) -> Result<Vec<InAppMessageImpression>>;

    fn set(&self, in_app_message_id: i64, impressions: Vec<InAppMessageImpression>) -> Result<()>;
}

/// A presentation of an in-app message to be recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessagePresentRequest {
    pub in_app_message_id: i64,
    pub identifiers: HashMap<String, String>,
    /// The reason the message was decided for presentation.
    pub reason: DecisionReason,
    pub requested_at: DateTime<Utc>,
}

/// Appends impressions to the bounded per-message history.
pub struct InAppMessageRecorder {
    storage: Arc<dyn InAppMessageImpressionStorage>,
}

impl InAppMessageRecorder {
    pub fn new(storage: Arc<dyn InAppMessageImpressionStorage>) -> Self {
        Self { storage }
    }

    /// Presentations forced by an override are not recorded. Storage failures are logged.
    pub fn record(&self, request: &InAppMessagePresentRequest) {
        if request.reason == DecisionReason::Overridden {
            return;
        }
        if let Err(e) = self.append(request) {
            warn!("Failed to record InAppMessageImpression: {}", e);
        }
    }

    fn append(&self, request: &InAppMessagePresentRequest) -> Result<()> {
        let mut impressions = self.storage.get(request.in_app_message_id)?;
        impressions.push(InAppMessageImpression {
            identifiers: request.identifiers.clone(),
            timestamp: request.requested_at.timestamp_millis() as f64 / 1000.0,
        });
        if impressions.len() > MAX_IMPRESSIONS {
            let overflow = impressions.len() - MAX_IMPRESSIONS;
            impressions.drain(..overflow);
        }
        self.storage.set(request.in_app_message_id, impressions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::InMemoryImpressionStorage;
    use assert_json_diff::assert_json_eq;
    use chrono::TimeZone;
    use maplit::hashmap;
    use serde_json::json;
    use spectral::prelude::*;
    use std::sync::Mutex;
    use test_case::test_case;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn schedule_request(delay: Duration) -> InAppMessageScheduleRequest {
        let requested_at = at(1_000);
        InAppMessageScheduleRequest::new(
            InAppMessageSchedule {
                dispatch_id: "dispatch-1".to_string(),
                in_app_message_key: 7,
                identifiers: hashmap! {"$id".to_string() => "user-1".to_string()},
                time: ScheduleTime {
                    started_at: at(900),
                    deliver_at: requested_at + delay,
                },
            },
            InAppMessageScheduleType::Triggered,
            requested_at,
        )
    }

    #[test_case(Duration::seconds(1), InAppMessageScheduleAction::Delay)]
    #[test_case(Duration::seconds(60), InAppMessageScheduleAction::Delay)]
    #[test_case(Duration::zero(), InAppMessageScheduleAction::Deliver)]
    #[test_case(Duration::seconds(-1), InAppMessageScheduleAction::Deliver)]
    #[test_case(Duration::seconds(-60), InAppMessageScheduleAction::Deliver)]
    #[test_case(Duration::microseconds(-60_000_100), InAppMessageScheduleAction::Ignore)]
    #[test_case(Duration::seconds(-3600), InAppMessageScheduleAction::Ignore)]
    fn determines_schedule_action(delay: Duration, expected: InAppMessageScheduleAction) {
        let action = InAppMessageScheduleActionDeterminer::new().determine(&schedule_request(delay));
        assert_that!(action).is_equal_to(Ok(expected));
    }

    #[test]
    fn delay_is_measured_from_request_time() {
        let request = schedule_request(Duration::seconds(30));
        assert_that!(request.delay()).is_equal_to(Duration::seconds(30));
        assert_that!(request.schedule.time.delay(at(1_100))).is_equal_to(Duration::seconds(-70));
    }

    #[derive(Default)]
    struct RecordingScheduler {
        calls: Mutex<Vec<InAppMessageScheduleAction>>,
        fail: bool,
    }

    impl RecordingScheduler {
        fn respond(
            &self,
            request: &InAppMessageScheduleRequest,
            action: InAppMessageScheduleAction,
            code: InAppMessageScheduleCode,
        ) -> Result<InAppMessageScheduleResponse> {
            self.calls.lock().unwrap().push(action);
            if self.fail {
                return Err(Error::Storage("scheduler unavailable".to_string()));
            }
            Ok(InAppMessageScheduleResponse::of(request, code))
        }
    }

    impl InAppMessageScheduler for RecordingScheduler {
        fn deliver(&self, request: &InAppMessageScheduleRequest) -> Result<InAppMessageScheduleResponse> {
            self.respond(request, InAppMessageScheduleAction::Deliver, InAppMessageScheduleCode::Deliver)
        }

        fn delay(&self, request: &InAppMessageScheduleRequest) -> Result<InAppMessageScheduleResponse> {
            self.respond(request, InAppMessageScheduleAction::Delay, InAppMessageScheduleCode::Delay)
        }

        fn ignore(&self, request: &InAppMessageScheduleRequest) -> Result<InAppMessageScheduleResponse> {
            self.respond(request, InAppMessageScheduleAction::Ignore, InAppMessageScheduleCode::Ignore)
        }
    }

    #[test_case(Duration::seconds(10), InAppMessageScheduleCode::Delay)]
    #[test_case(Duration::zero(), InAppMessageScheduleCode::Deliver)]
    #[test_case(Duration::seconds(-61), InAppMessageScheduleCode::Ignore)]
    fn processor_dispatches_action(delay: Duration, expected: InAppMessageScheduleCode) {
        let scheduler = Arc::new(RecordingScheduler::default());
        let processor =
            InAppMessageScheduleProcessor::new(InAppMessageScheduleActionDeterminer::new(), scheduler.clone());

        let response = processor.process(&schedule_request(delay));
        assert_that!(response.code).is_equal_to(expected);
        assert_that!(response.dispatch_id.as_str()).is_equal_to("dispatch-1");
        assert_that!(scheduler.calls.lock().unwrap().len()).is_equal_to(1);
    }

    #[test]
    fn processor_converts_scheduler_failure() {
        let scheduler = Arc::new(RecordingScheduler {
            calls: Mutex::new(vec![]),
            fail: true,
        });
        let processor =
            InAppMessageScheduleProcessor::new(InAppMessageScheduleActionDeterminer::new(), scheduler);

        let response = processor.process(&schedule_request(Duration::zero()));
        assert_that!(response.code).is_equal_to(InAppMessageScheduleCode::Exception);
        assert_that!(response.in_app_message_key).is_equal_to(7);
    }

    fn present_request(reason: DecisionReason, requested_at: DateTime<Utc>) -> InAppMessagePresentRequest {
        InAppMessagePresentRequest {
            in_app_message_id: 42,
            identifiers: hashmap! {
                "a".to_string() => "1".to_string(),
                "b".to_string() => "2".to_string(),
            },
            reason,
            requested_at,
        }
    }

    #[test]
    fn records_impression() {
        let storage = Arc::new(InMemoryImpressionStorage::new());
        let recorder = InAppMessageRecorder::new(storage.clone());

        recorder.record(&present_request(DecisionReason::TargetRuleMatch, at(320)));

        let impressions = storage.get(42).unwrap();
        assert_that!(impressions).has_length(1);
        assert_json_eq!(
            serde_json::to_value(&impressions[0]).unwrap(),
            json!({"identifiers": {"a": "1", "b": "2"}, "timestamp": 320.0})
        );
    }

    #[test]
    fn overridden_presentation_is_not_recorded() {
        let storage = Arc::new(InMemoryImpressionStorage::new());
        let recorder = InAppMessageRecorder::new(storage.clone());

        recorder.record(&present_request(DecisionReason::Overridden, at(320)));

        assert_that!(storage.get(42).unwrap()).is_empty();
    }

    #[test]
    fn keeps_the_latest_impressions() {
        let storage = Arc::new(InMemoryImpressionStorage::new());
        let recorder = InAppMessageRecorder::new(storage.clone());

        for i in 0..=(MAX_IMPRESSIONS as i64) {
            recorder.record(&present_request(DecisionReason::TargetRuleMatch, at(i)));
        }

        let impressions = storage.get(42).unwrap();
        assert_that!(impressions).has_length(MAX_IMPRESSIONS);
        assert_that!(impressions[0].timestamp).is_equal_to(1.0);
        assert_that!(impressions[MAX_IMPRESSIONS - 1].timestamp).is_equal_to(100.0);
    }

    struct FailingStorage;

    impl InAppMessageImpressionStorage for FailingStorage {
        fn get(&self, _in_app_message_id: i64) -> Result<Vec<InAppMessageImpression>> {
            Err(Error::Storage("unavailable".to_string()))
        }

        fn set(&self, _in_app_message_id: i64, _impressions: Vec<InAppMessageImpression>) -> Result<()> {
            Err(Error::Storage("unavailable".to_string()))
        }
    }

    #[test]
    fn storage_failure_is_swallowed() {
        let recorder = InAppMessageRecorder::new(Arc::new(FailingStorage));
        recorder.record(&present_request(DecisionReason::TargetRuleMatch, at(1)));
    }

    #[test]
    fn deserializes_stored_impressions() {
        let impressions: Vec<InAppMessageImpression> =
            serde_json::from_str(r#"[{"identifiers": {"$id": "a"}, "timestamp": 1690000000.5}]"#)
                .unwrap();
        assert_that!(impressions[0].timestamp).is_equal_to(1_690_000_000.5);
        assert_that!(impressions[0].identifiers.get("$id")).is_equal_to(Some(&"a".to_string()));
    }
}
