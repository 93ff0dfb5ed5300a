//! tracon - continuous ingestion and summarization for a live
//! air-traffic-control network.
//!
//! The engine polls the VATSIM v3 feeds, filters and persists per-poll
//! observations, and turns completed pilot and controller sessions into
//! durable summaries carrying the flight/controller interaction graph.

pub mod commands;
pub mod config;
pub mod controllers;
pub mod controllers_repo;
pub mod db;
pub mod errors;
pub mod filters;
pub mod flights;
pub mod flights_repo;
pub mod geodesy;
pub mod ingestion;
pub mod interactions;
pub mod metrics;
pub mod schema;
pub mod schema_check;
pub mod scheduler;
pub mod summaries;
pub mod summarizer;
pub mod transceivers;
pub mod transceivers_repo;
pub mod vatsim_client;

pub use config::AppConfig;
pub use errors::TraconError;
pub use filters::FilterPipeline;
pub use interactions::InteractionDetector;
pub use scheduler::Scheduler;
pub use summarizer::SummarizationService;
pub use vatsim_client::VatsimClient;
