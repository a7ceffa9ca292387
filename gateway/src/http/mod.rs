//! HTTP surface of the gateway.
//!
//! Defines the routes, the gatekeeper layer and the shared middleware stack.

pub mod account;
pub mod auth;
pub mod login;
pub mod pages;
pub mod server;

pub(crate) use server::*;
