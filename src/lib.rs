pub mod api;
pub mod app;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod lookups;
pub mod output;
pub mod schema;
