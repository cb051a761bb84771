//! Harvests swimming rankings, athlete profiles and personal-best results
//! from a paginated, script-rendered site into SQLite.
//!
//! The pipeline: [`pagination::exhaust`] loads a whole table through its
//! "load more" control, [`extract::RowExtractor`] turns each row into typed
//! fields, [`model`] validates them into records and [`upsert::UpsertSink`]
//! reconciles those by natural key. [`session`] ties the steps together for
//! one query and [`batch`] runs many queries.

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod model;
pub mod pagination;
pub mod params;
pub mod session;
pub mod upsert;
pub mod view;
