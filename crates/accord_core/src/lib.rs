//! A consent and data-access governance engine.
//!
//! This crate decides whether a party may access a protected record, tracks
//! the lifecycle of subject consent and keeps an append-only audit trail of
//! every realized access. It only reasons about references to data types;
//! the protected documents themselves live elsewhere.
//!
//! Each component is exposed as a [`tower`] service so that components can be
//! composed, wrapped with layers and shared across tasks. The
//! [`transport::http`] module binds the composed engine to an HTTP/JSON
//! boundary built on [`axum`].
//!
//! [`tower`]: https://docs.rs/tower
//! [`axum`]: https://docs.rs/axum

#[cfg(test)]
mod tests;

pub mod governance;
pub mod transport;

#[cfg(feature = "accord_tracing")]
pub mod accord_tracing {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize tracing for tests
    /// This sets up a tracing subscriber that will display logs during test execution.
    /// Call this at the beginning of tests that need to see tracing output.
    pub fn init() {
        INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("off"));

            fmt().with_target(false).with_test_writer().with_env_filter(filter).init();
        });
    }
}
