use std::time::Duration;

use accord_core::governance::{
    api::{Decision, GovernanceRequest, GovernanceResponse, LedgerRequest},
    config::GovernanceConfig,
    infrastructure::{
        clock::{Clock, SystemClock},
        naming::{ConsentKey, DataType, Reviewer, Role},
    },
    init_engine,
    services::consent::ConsentLedgerService,
};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use tower::Service;

const HOUR: Duration = Duration::from_secs(3600);

fn grant_request(subject: usize, data_type: DataType) -> LedgerRequest {
    LedgerRequest::Grant {
        subject_id: format!("student-{subject}"),
        data_type,
        purpose: "placement".to_string(),
        ttl: HOUR,
    }
}

fn check_request(subject: usize, data_types: Vec<DataType>) -> GovernanceRequest {
    GovernanceRequest::CheckAccess {
        accessed_by: "recruiter-1".to_string(),
        subject_id: format!("student-{subject}"),
        data_types,
        purpose: "placement".to_string(),
        source_context: "127.0.0.1".to_string(),
    }
}

// ConsentLedgerService Benchmarks
fn bench_ledger_grant_fresh_tuple(c: &mut Criterion) {
    c.bench_function("ledger_grant_fresh_tuple", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap()).iter(|| async {
            let mut ledger = ConsentLedgerService::default();
            let _ = black_box(ledger.call(grant_request(0, DataType::Resume)).await);
        });
    });
}

fn bench_ledger_grant_supersede(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut ledger = ConsentLedgerService::default();
    runtime.block_on(ledger.call(grant_request(0, DataType::Resume))).unwrap();

    c.bench_function("ledger_grant_supersede", |b| {
        b.to_async(&runtime).iter(|| {
            let mut ledger = ledger.clone();
            async move {
                let _ = black_box(ledger.call(grant_request(0, DataType::Resume)).await);
            }
        });
    });
}

fn bench_ledger_is_permitted(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut ledger = ConsentLedgerService::default();
    for subject in 0..1000 {
        runtime.block_on(ledger.call(grant_request(subject, DataType::Transcript))).unwrap();
    }
    let key = ConsentKey::new("student-500", DataType::Transcript, "placement");
    let clock = SystemClock::default();

    c.bench_function("ledger_is_permitted_populated", |b| {
        b.to_async(&runtime).iter(|| {
            let mut ledger = ledger.clone();
            let key = key.clone();
            let now = clock.now();
            async move {
                let _ = black_box(ledger.call(LedgerRequest::IsPermitted { key, now }).await);
            }
        });
    });
}

// GovernanceApiService Benchmarks
fn bench_governance_check_access_permitted(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (governance, _, mut ledger) = init_engine(GovernanceConfig::default());
    for data_type in [DataType::Resume, DataType::ContactInfo, DataType::Transcript] {
        runtime.block_on(ledger.call(grant_request(0, data_type))).unwrap();
    }

    c.bench_function("governance_check_access_permitted", |b| {
        b.to_async(&runtime).iter(|| {
            let mut governance = governance.clone();
            async move {
                let _ = black_box(
                    governance
                        .call(check_request(
                            0,
                            vec![DataType::Resume, DataType::ContactInfo, DataType::Transcript],
                        ))
                        .await,
                );
            }
        });
    });
}

fn bench_governance_check_access_requires_request(c: &mut Criterion) {
    c.bench_function("governance_check_access_requires_request", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap()).iter_batched(
            || init_engine(GovernanceConfig::default()).0,
            |mut governance| async move {
                let _ = black_box(governance.call(check_request(0, vec![DataType::Resume])).await);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_governance_request_approval(c: &mut Criterion) {
    c.bench_function("governance_request_approval", |b| {
        b.to_async(tokio::runtime::Runtime::new().unwrap()).iter_batched(
            || init_engine(GovernanceConfig::default()).0,
            |mut governance| async move {
                let Ok(GovernanceResponse::Request(request)) = governance
                    .call(GovernanceRequest::OpenRequest {
                        requester_id: "recruiter-1".to_string(),
                        requester_role: Role::Recruiter,
                        subject_id: "student-0".to_string(),
                        data_types: vec![DataType::Resume, DataType::ContactInfo],
                        purpose: "placement".to_string(),
                    })
                    .await
                else {
                    return;
                };
                let _ = black_box(
                    governance
                        .call(GovernanceRequest::ResolveRequest {
                            request_id: request.id,
                            reviewer: Reviewer::new("student-0", Role::Student),
                            decision: Decision::Approved,
                            grant_ttl: Some(HOUR),
                        })
                        .await,
                );
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    ledger_benches,
    bench_ledger_grant_fresh_tuple,
    bench_ledger_grant_supersede,
    bench_ledger_is_permitted,
);

criterion_group!(
    governance_benches,
    bench_governance_check_access_permitted,
    bench_governance_check_access_requires_request,
    bench_governance_request_approval,
);

criterion_main!(ledger_benches, governance_benches);
