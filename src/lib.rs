//! Password-gated upload relay to DigitalOcean Spaces, plus the pieces shared
//! with the `auto-upload` directory uploader.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
