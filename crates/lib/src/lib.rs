//! Airavata client library: real-time elephant alerts, the REST API and credentials,
//! shared by the CLI and any other front end.

pub mod alerts;
pub mod api;
pub mod app;
pub mod config;
pub mod credentials;
pub mod realtime;
