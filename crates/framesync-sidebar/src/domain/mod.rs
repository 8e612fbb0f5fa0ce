//! Domain types for the sidebar: method vocabularies, configuration schema
//! and the annotation data guests are allowed to see.
//!
//! Nothing here performs I/O or spawns tasks.

pub mod annotation;
pub mod config;
pub mod events;
