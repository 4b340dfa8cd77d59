//! HTTP surface of the upload pipeline: notifications, uploads, drain
//! triggering and runtime statistics.

pub mod app;
