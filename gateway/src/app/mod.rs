//! Application wiring: database, shared state and server startup.

pub mod db;
mod startup;
mod state;

pub(crate) use startup::start;
pub use state::AppState;
#[cfg(test)]
pub(crate) use state::test_support;
