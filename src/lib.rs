//! scrcpy-bridge - Android screen and input over WebSocket
//!
//! This crate deploys scrcpy-server to an Android device over ADB, re-frames
//! its H.264 stream into NAL units for any number of WebSocket viewers, and
//! turns viewer touches, keys and chat messages back into device actions.

pub mod agent;
pub mod config;
pub mod device;
pub mod error;
pub mod input;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
