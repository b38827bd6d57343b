//! Offline-first schedule and cart state for the course planner, kept in
//! step with the plan backend by a background pull/push loop.

pub mod config;
pub mod gateway;
pub mod models;
pub mod reducer;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;
pub mod tab_guard;

pub use config::Config;
pub use reducer::{reduce, Action};
pub use session::PlannerSession;
