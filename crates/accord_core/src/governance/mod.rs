//! Governance module.
//!
//! This module decides whether a party may access data of a subject, tracks
//! the lifecycle of the subject's consent and records every realized access.
//!
//! ## Service Components
//!
//! ### Core Services
//! - **Consent Ledger**: single source of truth for consent state, one active
//!   record per (subject, data type, purpose) tuple
//! - **Request Workflow**: human review of data requests, approval synthesizes
//!   consent through the ledger
//! - **Access Auditor**: append-only trail of realized accesses, each entry
//!   naming the consents that authorized it
//! - **Notifications**: broadcast of governance events to an external sink
//!
//! ### Infrastructure
//! - **Clock**: monotonic time source, mockable in tests
//! - **Naming**: typed identifiers, data types and roles
//! - **Listing**: lazy restartable sequences over service tables
//!
//! ## Default Service Stack
//!
//! [`GovernanceApiDefaultStack`] composes the three services behind the
//! governance façade. [`init_engine`] builds it from a [`GovernanceConfig`].
//!
//! [`GovernanceConfig`]: config::GovernanceConfig
use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod services;

/// Governance façade over the default ledger, workflow and auditor.
pub type GovernanceApiDefaultStack = api::facade::GovernanceApiService<
    services::consent::ConsentLedgerService,
    services::request::RequestWorkflowService<services::consent::ConsentLedgerService>,
    services::audit::AccessAuditorService<services::consent::ConsentLedgerService>,
>;

/// Initialize the governance engine on the system clock.
///
/// # Returns
/// A tuple containing (governance façade, notification channel, consent
/// ledger). The ledger handle is shared with the façade and is used to spawn
/// the expiry sweep.
pub fn init_engine(
    config: config::GovernanceConfig,
) -> (
    GovernanceApiDefaultStack,
    services::notification::NotificationService,
    services::consent::ConsentLedgerService,
) {
    init_engine_with_clock(config, Arc::new(infrastructure::clock::SystemClock::default()))
}

/// Initialize the governance engine on the given clock.
///
/// Every component shares the clock, the configuration and the notification
/// channel.
pub fn init_engine_with_clock(
    config: config::GovernanceConfig,
    clock: Arc<dyn infrastructure::clock::Clock>,
) -> (
    GovernanceApiDefaultStack,
    services::notification::NotificationService,
    services::consent::ConsentLedgerService,
) {
    let config = Arc::new(config);
    let notifications =
        services::notification::NotificationService::new(config.notification_capacity);
    let ledger =
        services::consent::ConsentLedgerService::new(clock.clone(), notifications.clone());
    let workflow = services::request::RequestWorkflowService::new(
        ledger.clone(),
        clock.clone(),
        config.clone(),
        notifications.clone(),
    );
    let auditor = services::audit::AccessAuditorService::new(ledger.clone(), clock.clone());

    let governance: GovernanceApiDefaultStack =
        api::facade::GovernanceApiService::new(ledger.clone(), workflow, auditor, clock, config);

    (governance, notifications, ledger)
}
