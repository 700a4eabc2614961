//! Grammar Tutor API Library Crate
//!
//! This library contains all the logic for the tutoring web service,
//! including the application state, both databases, authentication, API
//! handlers, the tutoring turn, and routing. The `api` binary is a thin
//! wrapper around this library.

pub mod agent_store;
pub mod auth;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod turn;

#[cfg(test)]
mod test_support;
