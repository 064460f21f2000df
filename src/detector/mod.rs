//! Gift detection pipeline and its lifecycle.
//!
//! Decides which messages are gifts, answers them and keeps the running
//! statistics and history the control panel shows.

mod auth;
mod controller;
mod history;
mod processor;
mod runner;
mod state;

pub use auth::{LoginBackend, LoginStage, LoginStep, SignInFailure, advance};
pub use controller::{ControlError, DetectorController, Simulation};
pub use history::{GiftHistory, GiftLog, GiftLogEntry};
pub use processor::{
    GiftProcessor, IgnoreReason, SimulateRequest, Verdict, build_gift_info, enrich_from_catalog,
};
pub use runner::{DetectorMessage, GiftDetector};
pub use state::{
    AuthState, Counters, DetectorStatus, LastGift, ProcessedCache, ResponseCooldown,
    StatusSnapshot,
};
