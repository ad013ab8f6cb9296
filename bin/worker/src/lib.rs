//! The tidewater worker: configuration, Postgres stores, the Web API chat
//! client and the internal HTTP surface. `main.rs` wires them together.

pub mod config;
pub mod db;
pub mod refresh;
pub mod routes;
pub mod slack;
