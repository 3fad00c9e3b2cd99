
use std::{sync::Arc, time::Duration};

use fixtures::AccessScenario;
use tower::{Service, ServiceBuilder, timeout::TimeoutLayer};

use crate::governance::{
    api::{Decision, GovernanceRequest, GovernanceResponse},
    config::GovernanceConfig,
    error::GovernanceError,
    infrastructure::{
        clock::{Clock, MockClock},
        naming::{DataType, Reviewer, Role, Timestamp},
    },
    init_engine, init_engine_with_clock,
    services::{
        audit::AccessLogFilter,
        consent::ConsentStatus,
        request::RequestStatus,
    },
};

const T0: Timestamp = Timestamp(1_700_000_000_000);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

#[tokio::test]
async fn integration_init_engine() {
    #[cfg(feature = "accord_tracing")]
    crate::accord_tracing::init();
    let (governance, _, _) = init_engine(GovernanceConfig::default());
    let mut governance = ServiceBuilder::new()
        .layer(TimeoutLayer::new(Duration::from_millis(100)))
        .service(governance);

    let alice = AccessScenario::new("recruiter-1", "alice", "placement");
    let record = grant!(governance, alice, DataType::Resume, HOUR);
    assert_eq!(record.status, ConsentStatus::Active);
    let entry = assert_permitted!(governance, alice, [DataType::Resume]);
    assert_eq!(entry.consent_record_ids.get(&DataType::Resume), Some(&record.id));
}

#[tokio::test]
async fn integration_lazy_expiry_scenario() {
    // 1h consent at t0, permitted at t0+30min, gone at t0+61min
    #[cfg(feature = "accord_tracing")]
    crate::accord_tracing::init();
    let clock = MockClock::new(T0);
    let (mut governance, _, _) =
        init_engine_with_clock(GovernanceConfig::default(), Arc::new(clock.clone()));
    let alice = AccessScenario::new("faculty-1", "alice", "research");

    let record = grant!(governance, alice, DataType::AcademicRecords, HOUR);
    clock.advance(Duration::from_secs(30 * 60));
    assert_permitted!(governance, alice, [DataType::AcademicRecords]);

    clock.advance(Duration::from_secs(31 * 60));
    assert_requires_request!(
        governance,
        alice,
        [DataType::AcademicRecords],
        vec![DataType::AcademicRecords]
    );

    let GovernanceResponse::Consents(consents) = governance
        .call(GovernanceRequest::ListConsents {
            subject_id: alice.subject_id(),
            status: None,
            search: None,
        })
        .await
        .unwrap()
    else {
        panic!("Expected GovernanceResponse::Consents");
    };
    let stored: Vec<_> = consents.iter().collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, record.id);
    assert_eq!(stored[0].status, ConsentStatus::Expired);
}

#[tokio::test]
async fn integration_recruiter_request_scenario() {
    // Recruiter asks for resume and contact details, an administrator
    // approves for a day, the resume is then accessible
    #[cfg(feature = "accord_tracing")]
    crate::accord_tracing::init();
    let clock = MockClock::new(T0);
    let (mut governance, _, _) =
        init_engine_with_clock(GovernanceConfig::default(), Arc::new(clock.clone()));
    let bob = AccessScenario::new("recruiter-1", "bob", "placement");

    assert_requires_request!(governance, bob, [DataType::Resume], vec![DataType::Resume]);
    let request =
        open_request!(governance, bob, Role::Recruiter, [DataType::Resume, DataType::ContactInfo]);
    assert_eq!(request.status, RequestStatus::Pending);

    clock.advance(Duration::from_secs(120));
    let Ok(GovernanceResponse::Request(approved)) = resolve!(
        governance,
        request.id,
        Reviewer::new("admin-1", Role::Admin),
        Decision::Approved,
        Some(DAY)
    ) else {
        panic!("Expected GovernanceResponse::Request");
    };
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.reviewed_at, Some(clock.now()));
    assert_eq!(approved.grant_expiry, clock.now().checked_add_millis(86_400_000));

    let GovernanceResponse::Consents(consents) = governance
        .call(GovernanceRequest::ListConsents {
            subject_id: bob.subject_id(),
            status: Some(ConsentStatus::Active),
            search: None,
        })
        .await
        .unwrap()
    else {
        panic!("Expected GovernanceResponse::Consents");
    };
    let active: Vec<_> = consents.iter().collect();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|consent| approved.consent_ids.contains(&consent.id)));

    let entry = assert_permitted!(governance, bob, [DataType::Resume]);
    assert!(approved.consent_ids.contains(&entry.consent_record_ids[&DataType::Resume]));

    // Reopening the same scope is now answered from standing consent
    let again =
        open_request!(governance, bob, Role::Recruiter, [DataType::Resume, DataType::ContactInfo]);
    assert_eq!(again.status, RequestStatus::Approved);
    assert_eq!(again.reviewer_id, Some(bob.subject_id()));
    assert_eq!(again.consent_ids.len(), 2);
}

#[tokio::test]
async fn integration_denied_request_grants_nothing() {
    #[cfg(feature = "accord_tracing")]
    crate::accord_tracing::init();
    let (mut governance, _, _) =
        init_engine_with_clock(GovernanceConfig::default(), Arc::new(MockClock::new(T0)));
    let carol = AccessScenario::new("faculty-2", "carol", "research");

    let request = open_request!(governance, carol, Role::Faculty, [DataType::ProjectDetails]);
    let Ok(GovernanceResponse::Request(denied)) =
        resolve!(governance, request.id, carol.subject(), Decision::Denied, None)
    else {
        panic!("Expected GovernanceResponse::Request");
    };
    assert_eq!(denied.status, RequestStatus::Denied);
    assert_requires_request!(
        governance,
        carol,
        [DataType::ProjectDetails],
        vec![DataType::ProjectDetails]
    );
    assert_eq!(
        resolve!(governance, request.id, carol.subject(), Decision::Approved, Some(DAY))
            .unwrap_err(),
        GovernanceError::AlreadyResolved(request.id)
    );
}

#[tokio::test]
async fn integration_revoke_is_idempotent_and_blocks_access() {
    #[cfg(feature = "accord_tracing")]
    crate::accord_tracing::init();
    let clock = MockClock::new(T0);
    let (mut governance, _, _) =
        init_engine_with_clock(GovernanceConfig::default(), Arc::new(clock.clone()));
    let dave = AccessScenario::new("recruiter-2", "dave", "placement");

    let record = grant!(governance, dave, DataType::Transcript, DAY);
    assert_permitted!(governance, dave, [DataType::Transcript]);

    clock.advance(Duration::from_secs(10));
    let first = revoke!(governance, dave, record.id);
    clock.advance(Duration::from_secs(10));
    let second = revoke!(governance, dave, record.id);
    assert_eq!(first, second);
    assert_eq!(first.revoked_at, Some(Timestamp(T0.0 + 10_000)));
    assert_requires_request!(governance, dave, [DataType::Transcript], vec![DataType::Transcript]);

    // The audit trail keeps the access authorized before the revoke
    let GovernanceResponse::Logs(logs) = governance
        .call(GovernanceRequest::QueryLogs(AccessLogFilter {
            subject_id: Some(dave.subject_id()),
            ..Default::default()
        }))
        .await
        .unwrap()
    else {
        panic!("Expected GovernanceResponse::Logs");
    };
    let entries: Vec<_> = logs.iter().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].consent_record_ids[&DataType::Transcript], record.id);
    assert!(entries[0].accessed_at < first.revoked_at.unwrap());
}

#[tokio::test]
async fn integration_review_queue_and_summary() {
    #[cfg(feature = "accord_tracing")]
    crate::accord_tracing::init();
    let clock = MockClock::new(T0);
    let (mut governance, _, _) =
        init_engine_with_clock(GovernanceConfig::default(), Arc::new(clock.clone()));

    let mut opened = Vec::new();
    for (requester, subject, role) in [
        ("recruiter-1", "erin", Role::Recruiter),
        ("faculty-1", "frank", Role::Faculty),
        ("recruiter-2", "grace", Role::Recruiter),
    ] {
        let scenario = AccessScenario::new(requester, subject, "placement");
        opened.push(open_request!(governance, scenario, role, [DataType::Resume]));
        clock.advance(Duration::from_secs(1));
    }
    resolve!(governance, opened[1].id, Reviewer::new("admin", Role::Admin), Decision::Denied, None)
        .unwrap();

    let GovernanceResponse::Requests(queue) = governance
        .call(GovernanceRequest::ListRequests {
            status: Some(RequestStatus::Pending),
            role: Some(Role::Recruiter),
            search: None,
        })
        .await
        .unwrap()
    else {
        panic!("Expected GovernanceResponse::Requests");
    };
    assert_eq!(
        queue.iter().map(|request| request.id).collect::<Vec<_>>(),
        vec![opened[0].id, opened[2].id]
    );

    let GovernanceResponse::Summary(summary) =
        governance.call(GovernanceRequest::Summary).await.unwrap()
    else {
        panic!("Expected GovernanceResponse::Summary");
    };
    assert_eq!(summary.requests.pending, 2);
    assert_eq!(summary.requests.denied, 1);
    assert_eq!(summary.accesses, 0);
}
