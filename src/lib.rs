//! Fragmux - fragmented to progressive MP4 remuxing
//!
//! This library crate exposes the CLI's configuration and reporting for
//! integration testing. The remux engine itself lives in `fragmux-media`.

pub mod config;
pub mod report;
