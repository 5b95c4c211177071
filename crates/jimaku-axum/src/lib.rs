//! Axum adapter: the HTTP surface of jimaku.
//!
//! Handlers only see the `AppContext` (services + coordinator); all
//! wiring happens at the composition root in the CLI crate.

#![deny(unsafe_code)]

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod state;

pub use bootstrap::{AppContext, start_server};
pub use routes::build_router;
pub use state::AppState;
