//! Residence Permit Photo API Library
//!
//! This library turns a spreadsheet of person records into identity records,
//! enriches each record with a generated passport photo from an external
//! image service, and exposes both over HTTP.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: External service integrations.
//! - `config`: Configuration management.
//! - `enrichment`: Per-record photo generation workflow.
//! - `errors`: Error handling types.
//! - `export`: Export naming and photo rasters.
//! - `handlers`: HTTP request handlers.
//! - `image_client`: Image generation service client.
//! - `ingest`: Spreadsheet parsing and validation.
//! - `models`: Core data models.
//! - `store`: Record collection with navigation cursor.

pub mod api;
pub mod core;
pub mod integrations;

pub mod config;
pub mod enrichment;
pub mod errors;
pub mod export;
pub mod handlers;
pub mod image_client;
pub mod ingest;
pub mod models;
pub mod store;
