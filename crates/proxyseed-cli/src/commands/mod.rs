//! Command handlers grouped by concern.

pub(crate) mod health;
pub(crate) mod requests;
