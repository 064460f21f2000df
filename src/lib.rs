//! Gift Responder Library
//!
//! A Telegram userbot that answers incoming gifts.
//!
//! This crate provides the core functionality for:
//! - Loading and validating settings and detection rules
//! - Connecting to Telegram via `MTProto`
//! - Recognising gift messages and replying with a summary
//! - Controlling the detector over a small HTTP API

pub mod api;
pub mod config;
pub mod detector;
pub mod gifts;
pub mod telegram;
