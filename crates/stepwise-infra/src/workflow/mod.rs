//! Workflow infrastructure: concrete action dispatchers.
//!
//! - `http_dispatcher` -- `HttpDispatcher`, POSTs actions to per-subject endpoints

pub mod http_dispatcher;

pub use http_dispatcher::HttpDispatcher;
