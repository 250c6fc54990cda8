// Library exports for agora
// This allows integration tests and external code to use agora modules

pub mod auth;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod hub;
pub mod pipeline;
pub mod posts;
pub mod routes;
pub mod server;
pub mod state;
