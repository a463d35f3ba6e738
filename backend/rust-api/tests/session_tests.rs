mod common;

use common::*;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

use proctor_api::models::*;
use proctor_api::services::session_service::SessionError;

fn submitted_report(outcome: SubmitOutcome) -> Report {
    match outcome {
        SubmitOutcome::Submitted { report, .. } => report,
        SubmitOutcome::AlreadyTerminated => panic!("expected this trigger to end the session"),
    }
}

#[tokio::test(start_paused = true)]
async fn consent_acquires_everything_and_goes_active() {
    let harness = Harness::new();
    let handle = harness.spawn(spec(600, all_resources()));
    assert_eq!(handle.view().status, SessionStatus::Unconsented);

    handle.consent().await.unwrap();

    let view = handle.view();
    assert_eq!(view.status, SessionStatus::Active);
    assert!(view.started_at.is_some());
    assert_eq!(view.remaining_seconds, 600);
    assert!(view.violations.is_empty());
    assert_eq!(harness.capture.started.load(Ordering::SeqCst), 2);
    assert_eq!(harness.display.entered.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn denied_webcam_is_recorded_and_test_still_starts() {
    let harness = Harness::new().deny(DeviceKind::Webcam);
    let handle = harness.start(spec(600, all_resources())).await;

    let view = handle.view();
    assert_eq!(view.status, SessionStatus::Active);
    assert_eq!(kinds(&view.violations), vec![ViolationKind::DeviceUnavailable]);
    assert!(view.violations[0].details.starts_with("webcam"));

    handle
        .record_response("q2", ResponseValue::Text("merge sort".into()))
        .await
        .unwrap();
    assert_eq!(handle.view().answered, 1);
}

#[tokio::test(start_paused = true)]
async fn refused_fullscreen_is_recorded() {
    let harness = Harness::new();
    harness.display.refuse.store(true, Ordering::SeqCst);
    let handle = harness.start(spec(600, all_resources())).await;

    let view = handle.view();
    assert_eq!(view.status, SessionStatus::Active);
    assert_eq!(kinds(&view.violations), vec![ViolationKind::DeviceUnavailable]);
    assert!(view.violations[0].details.starts_with("fullscreen"));
}

#[tokio::test(start_paused = true)]
async fn missing_event_source_blocks_the_start() {
    let mut harness = Harness::new();
    harness.with_signals = false;
    let handle = harness.spawn(spec(600, all_resources()));

    let result = handle.consent().await;
    assert!(matches!(result, Err(SessionError::CannotStart(_))));
    assert_eq!(handle.view().status, SessionStatus::Unconsented);
    assert_eq!(harness.capture.started.load(Ordering::SeqCst), 0);

    assert_eq!(
        handle.submit().await,
        Err(SessionError::IllegalState {
            operation: "submit",
            status: SessionStatus::Unconsented,
        })
    );

    // Leaving before the test started files nothing.
    let outcome = handle.abandon().await.unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Submitted {
            acknowledged: false,
            ..
        }
    ));
    assert!(harness.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn answers_are_rejected_outside_active() {
    let harness = Harness::new();
    let handle = harness.spawn(spec(600, RequiredResources::default()));

    let err = handle
        .record_response("q2", ResponseValue::Text("quicksort".into()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::IllegalState {
            operation: "record_response",
            status: SessionStatus::Unconsented,
        }
    );

    handle.consent().await.unwrap();
    handle.submit().await.unwrap();

    let err = handle.navigate(1).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::IllegalState {
            status: SessionStatus::Terminated,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn violations_keep_arrival_order_with_increasing_ids() {
    let harness = Harness::new();
    let handle = harness.start(spec(600, RequiredResources::default())).await;

    harness.emit(SignalKind::Copy);
    harness.emit(SignalKind::Paste);
    harness.emit(SignalKind::KeyDown(KeyCombo::new("F12")));
    harness.emit(SignalKind::KeyDown(KeyCombo::new("b")));
    harness.emit(SignalKind::ContextMenu);
    harness.emit(SignalKind::KeyDown(KeyCombo::new("Tab").alt()));
    settle().await;

    let view = handle.view();
    assert_eq!(
        kinds(&view.violations),
        vec![
            ViolationKind::CopyAttempt,
            ViolationKind::PasteAttempt,
            ViolationKind::RestrictedShortcut,
            ViolationKind::ContextMenuAttempt,
            ViolationKind::RestrictedShortcut,
        ]
    );
    let ids: Vec<u64> = view.violations.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(harness.monitor.violations.lock().unwrap().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn blocked_actions_are_suppressed_only_while_watching() {
    let harness = Harness::new();
    let handle = harness.spawn(spec(600, RequiredResources::default()));

    // Nobody is listening before consent.
    assert_eq!(harness.emit(SignalKind::Copy), Disposition::Allow);

    handle.consent().await.unwrap();
    assert_eq!(harness.emit(SignalKind::Copy), Disposition::Suppress);
    assert_eq!(harness.emit(SignalKind::Paste), Disposition::Suppress);
    assert_eq!(harness.emit(SignalKind::ContextMenu), Disposition::Suppress);
    assert_eq!(
        harness.emit(SignalKind::KeyDown(KeyCombo::new("c").ctrl())),
        Disposition::Suppress
    );
    assert_eq!(
        harness.emit(SignalKind::KeyDown(KeyCombo::new("x"))),
        Disposition::Allow
    );
    assert_eq!(
        harness.emit(SignalKind::Visibility { hidden: true }),
        Disposition::Allow
    );
}

#[tokio::test(start_paused = true)]
async fn long_absence_adds_one_extended_absence() {
    let harness = Harness::new();
    let handle = harness.start(spec(600, RequiredResources::default())).await;

    for _ in 0..2 {
        harness.emit(SignalKind::Visibility { hidden: true });
        settle().await;
        harness.emit(SignalKind::Visibility { hidden: false });
        settle().await;
    }

    harness.emit(SignalKind::Visibility { hidden: true });
    tokio::time::sleep(Duration::from_secs(6)).await;
    harness.emit(SignalKind::Visibility { hidden: false });
    settle().await;

    let view = handle.view();
    assert_eq!(
        kinds(&view.violations),
        vec![
            ViolationKind::TabSwitch,
            ViolationKind::TabSwitch,
            ViolationKind::TabSwitch,
            ViolationKind::ExtendedAbsence,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn remaining_time_counts_down() {
    let harness = Harness::new();
    let handle = harness.start(spec(60, RequiredResources::default())).await;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(handle.view().remaining_seconds, 57);
    assert_eq!(
        harness.monitor.last_snapshot().map(|s| s.remaining_seconds),
        Some(57)
    );
}

#[tokio::test(start_paused = true)]
async fn expiry_submits_automatically() {
    let harness = Harness::new();
    let handle = harness.start(spec(3, all_resources())).await;
    handle
        .record_response("q2", ResponseValue::Text("heap sort".into()))
        .await
        .unwrap();

    let view = handle.terminated().await;
    settle().await;
    assert_eq!(view.termination, Some(TerminationReason::Expired));
    assert_eq!(view.remaining_seconds, 0);

    let reports = harness.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].reason, TerminationReason::Expired);
    assert_eq!(reports[0].time_taken_seconds, 3);
    assert_eq!(reports[0].responses.len(), 1);
    assert_eq!(harness.capture.stopped.load(Ordering::SeqCst), 2);
    assert_eq!(harness.display.exited.load(Ordering::SeqCst), 1);
}

fn assert_single_teardown(harness: &Harness, outcome: &SubmitOutcome) -> TerminationReason {
    let reports = harness.reports();
    assert_eq!(reports.len(), 1);
    let reason = reports[0].reason;
    match outcome {
        SubmitOutcome::Submitted { report, .. } => {
            assert_eq!(reason, TerminationReason::Submitted);
            assert_eq!(report, &reports[0]);
        }
        SubmitOutcome::AlreadyTerminated => assert_eq!(reason, TerminationReason::Expired),
    }
    assert_eq!(harness.capture.stopped.load(Ordering::SeqCst), 2);
    assert_eq!(harness.display.exited.load(Ordering::SeqCst), 1);
    reason
}

#[tokio::test(start_paused = true)]
async fn submit_queued_behind_expiry_is_already_terminated() {
    let harness = Harness::new();
    let handle = harness.start(spec(1, all_resources())).await;
    let mut view = handle.subscribe();

    tokio::time::advance(Duration::from_secs(1)).await;
    // The last tick and the expiry are queued together, so once the tick
    // shows up the expiry is ahead of anything sent now.
    while view.borrow_and_update().remaining_seconds > 0 {
        view.changed().await.unwrap();
    }
    let outcome = handle.submit().await.unwrap();
    handle.terminated().await;
    settle().await;

    assert_eq!(outcome, SubmitOutcome::AlreadyTerminated);
    assert_eq!(
        assert_single_teardown(&harness, &outcome),
        TerminationReason::Expired
    );
    assert_eq!(
        handle.submit().await.unwrap(),
        SubmitOutcome::AlreadyTerminated
    );
}

#[tokio::test(start_paused = true)]
async fn submit_queued_ahead_of_expiry_wins() {
    let harness = Harness::new();
    let handle = harness.start(spec(1, all_resources())).await;

    let (outcome, _) = tokio::join!(
        handle.submit(),
        tokio::time::advance(Duration::from_secs(1))
    );
    let outcome = outcome.unwrap();
    settle().await;

    assert!(matches!(outcome, SubmitOutcome::Submitted { .. }));
    assert_eq!(
        assert_single_teardown(&harness, &outcome),
        TerminationReason::Submitted
    );
    assert_eq!(
        handle.terminated().await.termination,
        Some(TerminationReason::Submitted)
    );
}

#[tokio::test(start_paused = true)]
async fn nothing_is_logged_after_teardown() {
    let harness = Harness::new();
    let handle = harness.start(spec(600, RequiredResources::default())).await;
    harness.emit(SignalKind::Copy);
    settle().await;

    let report = submitted_report(handle.submit().await.unwrap());
    assert_eq!(report.violations.len(), 1);
    assert_eq!(harness.signals.subscriber_count(), 0);

    assert_eq!(harness.emit(SignalKind::Paste), Disposition::Allow);
    settle().await;
    assert_eq!(handle.view().violations.len(), 1);
    assert_eq!(harness.reports()[0].violations, report.violations);
}

#[tokio::test(start_paused = true)]
async fn force_end_files_a_report() {
    let harness = Harness::new();
    let handle = harness.start(spec(600, all_resources())).await;

    let report = submitted_report(handle.force_end().await.unwrap());
    assert_eq!(report.reason, TerminationReason::ForcedEnd);
    assert_eq!(harness.reports().len(), 1);
    assert_eq!(
        harness.monitor.last_snapshot().map(|s| s.status),
        Some(ParticipantStatus::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_abandons_the_session() {
    let harness = Harness::new();
    let handle = harness.start(spec(600, all_resources())).await;
    let mut view = handle.subscribe();
    drop(handle);

    loop {
        if view.borrow_and_update().status == SessionStatus::Terminated {
            break;
        }
        if view.changed().await.is_err() {
            break;
        }
    }
    settle().await;

    assert_eq!(view.borrow().termination, Some(TerminationReason::Abandoned));
    let reports = harness.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].reason, TerminationReason::Abandoned);
    assert_eq!(harness.capture.stopped.load(Ordering::SeqCst), 2);
    assert_eq!(
        harness.monitor.last_snapshot().map(|s| s.status),
        Some(ParticipantStatus::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn submit_during_acquisition_ends_without_starting() {
    let harness = Harness::new();
    *harness.capture.delay.lock().unwrap() = Some(Duration::from_secs(5));
    let handle = harness.spawn(spec(600, all_resources()));

    let consenting = handle.clone();
    let consent = tokio::spawn(async move { consenting.consent().await });
    settle().await;
    assert_eq!(handle.view().status, SessionStatus::AcquiringResources);

    let err = handle
        .record_response("q2", ResponseValue::Text("bubble sort".into()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::IllegalState {
            operation: "record_response",
            status: SessionStatus::AcquiringResources,
        }
    );

    let report = submitted_report(handle.submit().await.unwrap());
    consent.await.unwrap().unwrap();

    assert_eq!(report.reason, TerminationReason::Submitted);
    assert!(report.started_at.is_none());
    let view = handle.view();
    assert_eq!(view.status, SessionStatus::Terminated);
    assert!(view.started_at.is_none());
    assert_eq!(
        harness.capture.started.load(Ordering::SeqCst),
        harness.capture.stopped.load(Ordering::SeqCst)
    );
}

#[tokio::test(start_paused = true)]
async fn lost_device_and_fullscreen_exit_are_violations() {
    let harness = Harness::new();
    let required = RequiredResources {
        webcam: true,
        microphone: false,
        fullscreen: true,
    };
    let handle = harness.start(spec(600, required)).await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(harness.samples.samples.lock().unwrap().len(), 1);

    harness.display.user_exit();
    harness.capture.broken.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;

    let view = handle.view();
    assert_eq!(
        kinds(&view.violations),
        vec![ViolationKind::FullscreenExit, ViolationKind::DeviceUnavailable]
    );

    handle.submit().await.unwrap();
    // The user already left fullscreen; teardown does not exit it again.
    assert_eq!(harness.display.exited.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn supervisor_flag_and_messages_reach_the_session() {
    let harness = Harness::new();
    let handle = harness.start(spec(600, RequiredResources::default())).await;

    handle.flag().unwrap();
    handle.send_message("Please keep your face in view").unwrap();
    settle().await;

    let view = handle.view();
    assert!(view.flagged);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "Please keep your face in view");

    let report = submitted_report(handle.submit().await.unwrap());
    assert!(report.flagged);

    handle.send_message("too late").unwrap();
    settle().await;
    assert_eq!(handle.view().messages.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn answer_editing_and_navigation() {
    let harness = Harness::new();
    let handle = harness.start(spec(600, RequiredResources::default())).await;

    handle.toggle_choice("q1", 0).await.unwrap();
    handle.toggle_choice("q1", 2).await.unwrap();
    handle.toggle_choice("q1", 3).await.unwrap();
    handle.toggle_choice("q1", 3).await.unwrap();
    assert_eq!(handle.navigate(1).await, Ok(1));

    assert_eq!(
        handle.navigate(5).await,
        Err(SessionError::NavigationOutOfRange { index: 5, len: 2 })
    );
    assert!(matches!(
        handle.toggle_choice("q2", 0).await,
        Err(SessionError::ResponseMismatch { .. })
    ));
    assert!(matches!(
        handle.toggle_choice("q1", 9).await,
        Err(SessionError::ChoiceOutOfRange { option: 9, .. })
    ));
    assert!(matches!(
        handle
            .record_response("q1", ResponseValue::Text("2".into()))
            .await,
        Err(SessionError::ResponseMismatch { .. })
    ));
    assert_eq!(
        handle
            .record_response("nope", ResponseValue::Text("x".into()))
            .await,
        Err(SessionError::UnknownQuestion("nope".to_string()))
    );

    let view = handle.view();
    assert_eq!(view.current_question_index, 1);
    assert_eq!(view.answered, 1);
    assert_eq!(
        harness.monitor.last_snapshot().map(|s| s.progress),
        Some(Progress {
            answered: 1,
            total: 2
        })
    );

    let report = submitted_report(handle.submit().await.unwrap());
    assert_eq!(
        report.responses.get("q1"),
        Some(&ResponseValue::Choices(BTreeSet::from([0, 2])))
    );
}
