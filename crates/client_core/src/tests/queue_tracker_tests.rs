use std::{collections::VecDeque, sync::Mutex as StdMutex, time::Duration};

use super::*;
use crate::ApiResult;
use async_trait::async_trait;
use shared::protocol::ActionAck;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Default)]
struct FakeQueue {
    statuses: StdMutex<VecDeque<ApiResult<QueueStatusSnapshot>>>,
    last: StdMutex<Option<QueueStatusSnapshot>>,
    queries: StdMutex<Vec<QueueStatusQuery>>,
    check_ins: StdMutex<Vec<CheckInRequest>>,
    check_in_failure: StdMutex<Option<HospitalApiError>>,
    first_call_gate: StdMutex<Option<Arc<Notify>>>,
}

impl FakeQueue {
    fn with_statuses(statuses: Vec<ApiResult<QueueStatusSnapshot>>) -> Self {
        Self {
            statuses: StdMutex::new(statuses.into()),
            ..Self::default()
        }
    }

    fn failing_check_in(self, err: HospitalApiError) -> Self {
        *self.check_in_failure.lock().expect("failure") = Some(err);
        self
    }

    /// The first status call picks its answer, then waits for `gate` before returning it.
    fn holding_first_call(self, gate: Arc<Notify>) -> Self {
        *self.first_call_gate.lock().expect("gate") = Some(gate);
        self
    }

    fn status_calls(&self) -> usize {
        self.queries.lock().expect("queries").len()
    }
}

#[async_trait]
impl QueueApi for FakeQueue {
    async fn queue_status(&self, query: &QueueStatusQuery) -> ApiResult<QueueStatusSnapshot> {
        self.queries.lock().expect("queries").push(query.clone());
        let next = self.statuses.lock().expect("statuses").pop_front();
        let gate = self.first_call_gate.lock().expect("gate").take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match next {
            Some(Ok(snapshot)) => {
                *self.last.lock().expect("last") = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(err)) => Err(err),
            None => self
                .last
                .lock()
                .expect("last")
                .clone()
                .ok_or_else(|| HospitalApiError::Decode {
                    endpoint: "agents/queue/status".into(),
                    detail: "no scripted status".into(),
                }),
        }
    }

    async fn check_in(&self, request: &CheckInRequest) -> ApiResult<ActionAck> {
        self.check_ins.lock().expect("check-ins").push(request.clone());
        match self.check_in_failure.lock().expect("failure").take() {
            Some(err) => Err(err),
            None => Ok(ActionAck::default()),
        }
    }
}

fn snapshot(status: QueueStatus) -> QueueStatusSnapshot {
    QueueStatusSnapshot {
        status,
        current_token: Some(TokenNumber(4)),
        present_ahead: Some(2),
        patients_ahead: None,
        waiting_ahead: Some(1),
        estimated_wait_minutes: None,
        message: None,
    }
}

fn unavailable() -> HospitalApiError {
    HospitalApiError::Rejected {
        endpoint: "agents/queue/status".into(),
        status: 503,
        message: None,
    }
}

fn march_14() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).expect("date")
}

fn bundle() -> HandoffBundle {
    HandoffBundle {
        token_number: Some(TokenNumber(12)),
        visit_id: Some(VisitId(
            Uuid::parse_str("9d3e4c1a-6b7f-4e2d-8c5a-1f0e9b8a7c6d").expect("uuid"),
        )),
        doctor_id: Some(DoctorId(
            Uuid::parse_str("0b6c8f8e-3a0e-4d5e-9a1b-4c8e2f1d7a10").expect("uuid"),
        )),
        queue_date: Some(march_14()),
        patient_name: Some("Asha Rao".into()),
        department: Some("Cardiology".into()),
        phone_number: Some("5551234567".into()),
        doctor_name: Some("Dr. Mehta".into()),
    }
}

fn tracker(api: Arc<FakeQueue>) -> Arc<QueueTracker> {
    let context = QueueTrackingContext::from_handoff(bundle(), march_14()).expect("context");
    QueueTracker::new(api, context, Timings::default())
}

fn drain(rx: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn redirects(events: &[TrackerEvent]) -> usize {
    events
        .iter()
        .filter(|event| **event == TrackerEvent::Navigate(Route::RegistrationStart))
        .count()
}

#[tokio::test]
async fn missing_identity_redirects_before_any_fetch() {
    let api = Arc::new(FakeQueue::with_statuses(vec![Ok(snapshot(
        QueueStatus::Waiting,
    ))]));
    let incomplete = HandoffBundle {
        visit_id: None,
        ..bundle()
    };

    let err = match QueueTracker::mount(api.clone(), incomplete, Timings::default()).await {
        Ok(_) => panic!("tracker must not mount without a visit id"),
        Err(err) => err,
    };

    assert!(matches!(&err, TrackerError::MissingIdentity { missing } if missing == &["visit_id"]));
    assert_eq!(err.redirect(), Some(Route::RegistrationStart));
    assert_eq!(api.status_calls(), 0);
}

#[test]
fn queue_date_defaults_to_today() {
    let context = QueueTrackingContext::from_handoff(
        HandoffBundle {
            queue_date: None,
            ..bundle()
        },
        march_14(),
    )
    .expect("context");
    assert_eq!(context.queue_date, march_14());
    assert_eq!(context.status_query().role, QueueRole::Patient);
}

#[test]
fn called_status_completes_earlier_milestones() {
    let projection = project_progress(Some(QueueStatus::Called));
    let states: Vec<_> = projection
        .milestones
        .iter()
        .map(|milestone| (milestone.label, milestone.state))
        .collect();

    assert_eq!(
        states,
        vec![
            ("Booked", MilestoneState::Completed),
            ("Checked In", MilestoneState::Completed),
            ("Called", MilestoneState::Active),
            ("In Consultation", MilestoneState::Pending),
        ]
    );
    assert_eq!(projection.state, ProgressState::InProgress);
}

#[test]
fn skipped_status_has_no_active_milestone() {
    let projection = project_progress(Some(QueueStatus::Skipped));
    assert!(projection
        .milestones
        .iter()
        .all(|milestone| milestone.state == MilestoneState::Pending));
    assert_eq!(projection.state, ProgressState::NoActiveMilestone);
    assert_eq!(projection.active(), None);
}

#[test]
fn missing_snapshot_reads_as_waiting_and_completed_finishes() {
    let before = project_progress(None);
    assert_eq!(
        before.active().map(|milestone| milestone.status),
        Some(QueueStatus::Waiting)
    );

    let done = project_progress(Some(QueueStatus::Completed));
    assert_eq!(done.state, ProgressState::Finished);
    assert_eq!(done.active(), None);
}

#[tokio::test(start_paused = true)]
async fn initial_fetch_shows_indicator_and_polling_is_silent() {
    let api = Arc::new(FakeQueue::with_statuses(vec![
        Ok(snapshot(QueueStatus::Waiting)),
        Ok(snapshot(QueueStatus::Present)),
    ]));
    let tracker = tracker(api.clone());
    let mut events = tracker.subscribe_events();

    tracker.start().await.expect("initial fetch");
    let initial = drain(&mut events);
    assert_eq!(initial.first(), Some(&TrackerEvent::RefreshingChanged(true)));
    assert!(initial.contains(&TrackerEvent::RefreshingChanged(false)));

    tokio::time::sleep(Duration::from_millis(10_100)).await;
    let polled = drain(&mut events);
    assert_eq!(api.status_calls(), 2);
    assert!(polled.contains(&TrackerEvent::StatusUpdated(snapshot(QueueStatus::Present))));
    assert!(!polled
        .iter()
        .any(|event| matches!(event, TrackerEvent::RefreshingChanged(_))));
    tracker.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn polling_survives_a_failed_fetch() {
    let api = Arc::new(FakeQueue::with_statuses(vec![
        Ok(snapshot(QueueStatus::Waiting)),
        Err(unavailable()),
        Ok(snapshot(QueueStatus::Present)),
    ]));
    let tracker = tracker(api.clone());
    tracker.start().await.expect("initial fetch");

    tokio::time::sleep(Duration::from_millis(10_100)).await;
    assert_eq!(tracker.error().await.as_deref(), Some(QUEUE_STATUS_ERROR));
    assert_eq!(
        tracker.snapshot().await.map(|snapshot| snapshot.status),
        Some(QueueStatus::Waiting)
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.status_calls(), 3);
    assert_eq!(tracker.error().await, None);
    assert_eq!(
        tracker.snapshot().await.map(|snapshot| snapshot.status),
        Some(QueueStatus::Present)
    );
    tracker.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn completion_redirects_exactly_once() {
    let api = Arc::new(FakeQueue::with_statuses(vec![Ok(snapshot(
        QueueStatus::Completed,
    ))]));
    let tracker = tracker(api);
    let mut events = tracker.subscribe_events();

    tracker.start().await.expect("initial fetch");
    tracker.refresh().await.expect("manual refresh");
    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert_eq!(redirects(&drain(&mut events)), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let later = drain(&mut events);
    assert_eq!(redirects(&later), 1);
    assert_eq!(
        tracker.guidance().await.as_deref(),
        Some("Consultation Complete! Thank you for your visit. Redirecting to home...")
    );
}

#[tokio::test(start_paused = true)]
async fn teardown_before_the_delay_prevents_redirect() {
    let api = Arc::new(FakeQueue::with_statuses(vec![Ok(snapshot(
        QueueStatus::Completed,
    ))]));
    let tracker = tracker(api.clone());
    let mut events = tracker.subscribe_events();

    tracker.start().await.expect("initial fetch");
    tokio::time::sleep(Duration::from_secs(1)).await;
    tracker.teardown().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(redirects(&drain(&mut events)), 0);
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn check_in_refetches_status_immediately() {
    let api = Arc::new(FakeQueue::with_statuses(vec![
        Ok(snapshot(QueueStatus::Waiting)),
        Ok(snapshot(QueueStatus::Present)),
    ]));
    let tracker = tracker(api.clone());
    tracker.start().await.expect("initial fetch");
    assert!(tracker.can_check_in().await);

    tracker.check_in().await.expect("check in");

    let check_ins = api.check_ins.lock().expect("check-ins").clone();
    assert_eq!(check_ins.len(), 1);
    assert_eq!(check_ins[0].queue_date, march_14());
    assert_eq!(api.status_calls(), 2);
    assert_eq!(
        tracker.snapshot().await.map(|snapshot| snapshot.status),
        Some(QueueStatus::Present)
    );
    assert!(!tracker.can_check_in().await);
    tracker.teardown().await;
}

#[tokio::test]
async fn failed_check_in_keeps_state_and_shows_error() {
    let api = Arc::new(
        FakeQueue::with_statuses(vec![Ok(snapshot(QueueStatus::Waiting))]).failing_check_in(
            HospitalApiError::Rejected {
                endpoint: "agents/queue/check-in".into(),
                status: 500,
                message: None,
            },
        ),
    );
    let tracker = tracker(api.clone());
    tracker.start().await.expect("initial fetch");

    let err = tracker.check_in().await.expect_err("check-in fails");

    assert!(matches!(err, TrackerError::Service { .. }));
    assert_eq!(tracker.error().await.as_deref(), Some(CHECK_IN_ERROR));
    assert_eq!(api.status_calls(), 1);
    assert_eq!(
        tracker.snapshot().await.map(|snapshot| snapshot.status),
        Some(QueueStatus::Waiting)
    );
    assert!(!tracker.is_checking_in().await);
    tracker.teardown().await;
}

#[tokio::test]
async fn check_in_is_only_offered_while_waiting() {
    let api = Arc::new(FakeQueue::with_statuses(vec![Ok(snapshot(
        QueueStatus::Present,
    ))]));
    let tracker = tracker(api.clone());

    let before_first_snapshot = tracker.check_in().await.expect_err("no snapshot yet");
    assert!(matches!(before_first_snapshot, TrackerError::CheckInUnavailable));

    tracker.start().await.expect("initial fetch");
    let err = tracker.check_in().await.expect_err("already present");
    assert!(matches!(err, TrackerError::CheckInUnavailable));
    assert!(api.check_ins.lock().expect("check-ins").is_empty());
    tracker.teardown().await;
}

#[tokio::test]
async fn called_alert_fires_once_when_enabled() {
    let api = Arc::new(FakeQueue::with_statuses(vec![
        Ok(snapshot(QueueStatus::Present)),
        Ok(snapshot(QueueStatus::Called)),
        Ok(snapshot(QueueStatus::Called)),
    ]));
    let tracker = tracker(api);
    tracker.set_alerts(true).await;
    let mut events = tracker.subscribe_events();

    tracker.start().await.expect("initial fetch");
    tracker.refresh().await.expect("called");
    tracker.refresh().await.expect("still called");

    let alerts = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, TrackerEvent::CalledAlert { .. }))
        .count();
    assert_eq!(alerts, 1);
    assert_eq!(
        tracker.guidance().await.as_deref(),
        Some("You've been called! Please proceed to the consultation room")
    );
    tracker.teardown().await;
}

#[tokio::test]
async fn leave_navigates_home_and_stops_tracking() {
    let api = Arc::new(FakeQueue::with_statuses(vec![Ok(snapshot(
        QueueStatus::Waiting,
    ))]));
    let tracker = tracker(api);
    let mut events = tracker.subscribe_events();
    tracker.start().await.expect("initial fetch");

    tracker.leave().await;

    assert_eq!(redirects(&drain(&mut events)), 1);
    assert!(matches!(
        tracker.refresh().await,
        Err(TrackerError::Closed)
    ));
}

#[tokio::test]
async fn slower_older_fetch_cannot_overwrite_a_newer_status() {
    let gate = Arc::new(Notify::new());
    let api = Arc::new(
        FakeQueue::with_statuses(vec![
            Ok(snapshot(QueueStatus::Waiting)),
            Ok(snapshot(QueueStatus::Called)),
        ])
        .holding_first_call(gate.clone()),
    );
    let tracker = tracker(api.clone());

    let slow = tokio::spawn({
        let tracker = Arc::clone(&tracker);
        async move { tracker.refresh().await }
    });
    for _ in 0..100 {
        if api.status_calls() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(api.status_calls(), 1);

    let fresh = tracker.refresh().await.expect("newer fetch");
    assert_eq!(fresh.status, QueueStatus::Called);

    gate.notify_one();
    let stale = slow.await.expect("join");

    assert!(matches!(stale, Err(TrackerError::Superseded)));
    assert_eq!(
        tracker.snapshot().await.map(|snapshot| snapshot.status),
        Some(QueueStatus::Called)
    );
    assert!(!tracker.is_refreshing().await);
    tracker.teardown().await;
}

#[tokio::test]
async fn unlisted_backend_status_is_tracked_without_error() {
    let scheduled: QueueStatusSnapshot = serde_json::from_value(serde_json::json!({
        "status": "scheduled",
        "current_token": 2
    }))
    .expect("snapshot");
    let api = Arc::new(FakeQueue::with_statuses(vec![Ok(scheduled)]));
    let tracker = tracker(api);

    let snapshot = tracker.start().await.expect("fetch");

    assert_eq!(snapshot.status, QueueStatus::Unrecognized);
    assert_eq!(tracker.error().await, None);
    let progress = tracker.progress().await;
    assert_eq!(progress.state, ProgressState::NoActiveMilestone);
    assert!(progress
        .milestones
        .iter()
        .all(|milestone| milestone.state == MilestoneState::Pending));
    assert_eq!(tracker.guidance().await, None);
    assert!(!tracker.can_check_in().await);
    tracker.teardown().await;
}
