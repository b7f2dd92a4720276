//! Floodmap - map layer preferences and area flood severity for a flood map client.
//!
//! # Overview
//!
//! Two independent concerns share this crate:
//!
//! - **Layer preferences**: the user's base map, overlay visibility and
//!   overlay opacity. Guests keep them in a local key-value store,
//!   authenticated users in their remote profile. Changes apply in memory
//!   immediately and are persisted after a short quiet period.
//! - **Area severity**: readings from water-level stations are reduced to a
//!   single flood status per area, never safer than the worst station in it.
//!
//! # Modules
//!
//! - [`model`]: Settings, station and area data types
//! - [`storage`]: SQLite-backed local key-value store
//! - [`remote`]: HTTP client for the flood map API
//! - [`preferences`]: Routing of loads and saves between local and remote
//! - [`sync`]: Debounced write-through
//! - [`settings`]: The canonical in-memory settings
//! - [`aggregation`]: Station-to-area severity aggregation
//! - [`config`]: Environment configuration

pub mod aggregation;
pub mod config;
pub mod error;
pub mod model;
pub mod preferences;
pub mod remote;
pub mod settings;
pub mod storage;
pub mod sync;
