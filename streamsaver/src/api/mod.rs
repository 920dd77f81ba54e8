//! HTTP API over the download engine.

pub mod error;
pub mod models;
pub mod requests;
pub mod routes;
pub mod server;

pub use requests::{Request, RequestStore};
pub use server::{ApiServer, ApiServerConfig, AppState};
