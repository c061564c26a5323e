//! Core data models for the theme asset staging service.
//!
//! Sessions and assets map to database tables via `sqlx::FromRow`; theme
//! payloads are the JSON documents submitted by authoring clients.

pub mod asset;
pub mod session;
pub mod slot;
pub mod theme;
