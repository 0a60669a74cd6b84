//! Core types and trait definitions for the gantry admin scaffolding.
//!
//! This crate holds the capability model, the entity-type registry, records
//! and change-sets, the listing engine, and the saved-search manager. It is
//! deliberately free of HTTP and database dependencies: storage backends
//! implement [`store::EntityStore`], web layers consume [`render`] payloads.

pub mod access;
pub mod capability;
pub mod context;
pub mod error;
pub mod factory;
pub mod forms;
pub mod hierarchy;
pub mod listing;
pub mod overview;
pub mod record;
pub mod render;
pub mod schema;
pub mod search;
pub mod session;
pub mod statemachine;
pub mod store;
pub mod user;

pub use error::{Error, Result};
