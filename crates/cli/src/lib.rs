//! Command handlers for the photo-resizer binary
pub mod commands;
