//! # gattlink-server
//!
//! HTTP server library for gattlink: the API handlers, the session view
//! projection and logging setup.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
pub mod view;
