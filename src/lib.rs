// Public API for integration tests and potential library usage

pub mod api;
pub mod auth;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod rooms;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;
