//! Transport bindings of the governance engine.
//!
//! The engine itself is transport agnostic: every component is a
//! [`tower::Service`]. [`http`] exposes the governance façade as an HTTP/JSON
//! API for the web client.

pub mod http;
