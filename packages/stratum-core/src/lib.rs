//! Core of a modular record-based application server.
//!
//! Composes a model registry from ordered modules, stores records with
//! transactional journaling, assembles inherited XML views per user and
//! removes everything a module owns on uninstall.

pub mod base;
pub mod config;
pub mod data;
pub mod database;
pub mod domain;
pub mod error;
pub mod expr;
pub mod module;
pub mod registry;
pub mod security;
pub mod store;
pub mod transaction;
pub mod uninstall;
pub mod views;
pub mod xml;

pub use config::CoreConfig;
pub use database::Database;
pub use error::CoreError;
