pub mod alerts;
pub mod auth;
pub mod config;
pub mod playback;
pub mod recording;
pub mod recovery;
pub mod storage;
pub mod telemetry;
pub mod web;
