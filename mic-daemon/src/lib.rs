//! Keeps the microphone input volume at a target level while a call is in
//! progress.
//!
//! Call activity is inferred from microphone energy ([`audio`],
//! [`detector`]); the volume is read and written through external commands
//! ([`command`], [`volume`]); [`controller`] ties both together.

pub mod audio;
pub mod cli;
pub mod command;
pub mod config;
pub mod controller;
pub mod detector;
pub mod logging;
pub mod shutdown;
pub mod volume;
