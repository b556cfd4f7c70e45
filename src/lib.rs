pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod media;
pub mod messages;
pub mod notifications;
pub mod posts;
pub mod reaper;
pub mod routes;
pub mod social;
pub mod state;
