//! Shared data model and plumbing for the retouch image editor: the
//! normalized `Image`, configuration, model registry, session command
//! parsing, the JSONL event log and edit receipts.

pub mod chat;
pub mod config;
pub mod events;
pub mod image;
pub mod models;
pub mod receipts;

pub use config::EditorConfig;
pub use image::{Image, InvalidImage};
