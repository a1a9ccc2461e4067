//! house_app: booking marketplace backend.
//!
//! Users register and log in with a cookie-borne session token, list rental
//! places, upload photos for them and book places for a date range.
//!
//! Stack: Axum (HTTP/JSON), Sled (embedded document store), bcrypt +
//! jsonwebtoken (credentials and sessions), reqwest (photo download by link).

pub mod config;
pub mod error;
pub mod models;
pub mod auth;
pub mod storage;
// Photo uploads and link downloads, served back under /uploads
pub mod assets;
pub mod rest;
pub mod telemetry;
