//! Core library for the `daq_bridge` instrument bridge.
//!
//! Connects laboratory instruments (Agilent E8257D and Anritsu MG3692C signal
//! generators, a Lake Shore 218 temperature monitor, a T&D TR-71W network thermometer)
//! to named publish/subscribe topics.
//!
//! # Layers
//!
//! - [`transport`]: one request/response session per instrument, shared behind a lock
//! - [`driver`]: typed getters/setters over instrument command strings
//! - [`controller`]: publishes readings, turns command messages into driver calls
//! - [`bus`]: in-process topics; [`relay`] forwards them as JSON lines over stdio
//! - [`app`]: assembles the layers from a [`config::BridgeConfig`] and supervises tasks

pub mod app;
pub mod bus;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod logging;
pub mod relay;
pub mod transport;

pub use error::{AppResult, BridgeError};
