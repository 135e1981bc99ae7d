//! fwrest-api - REST surface of the device firmware control plane
//!
//! All device endpoints are resolved by the core route table rather than by
//! axum's router: the table's first-match order and its echo fallback for
//! unknown `api/` paths are part of the device's behaviour.
//!
//! # Usage
//!
//! ```ignore
//! use fwrest_api::{create_router, AppState};
//!
//! let state = AppState::new(collaborators, settings, log);
//! let router = create_router(state);
//! ```

pub mod error;
pub mod handlers;
pub mod routes;
pub mod settings;
pub mod state;
pub mod transport;

pub use error::{ApiError, Success};
pub use routes::{route_table, Endpoint};
pub use settings::{DeviceInfo, FlashLayout, LfsLayout, LogSettings, LogState};
pub use state::{ApiSettings, AppState, Collaborators};

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the device REST router with the given application state
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .fallback(routes::dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests;
