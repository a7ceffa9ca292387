//! Router assembly and response middleware.

pub mod middleware;
pub mod router;

pub(crate) use router::create_app;
