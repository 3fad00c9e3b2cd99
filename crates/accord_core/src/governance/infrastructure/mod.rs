//! Infrastructure shared by the governance services: naming, time and
//! identifier sources, lazy listings.

pub mod clock;
pub mod listing;
pub mod naming;
