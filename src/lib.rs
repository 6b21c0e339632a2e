pub mod assets;
pub mod auth;
pub mod config;
pub mod error;
pub mod forms;
pub mod models;
pub mod rate_limit; // per-user posting limits
pub mod repo;
pub mod routes;
pub mod security;
pub mod session; // signed cookie sessions and flash messages
pub mod views;

// Re-export commonly used items for tests / the binary
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
pub use session::{SessionKey, SessionLayer};
