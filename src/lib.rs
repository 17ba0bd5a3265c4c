//! Synchronization of EIT frames with isokinetic torque recordings.
//!
//! A measurement session produces three streams per participant:
//!
//! - `.eit` files from the tomography device, one per frame
//! - a tab-separated export of the dynamometer (torque, angle, velocity)
//! - JSON chunks of the same analog signals from the acquisition script,
//!   carrying host timestamps
//!
//! The dynamometer export has the cleanest torque but no usable clock; the
//! recorder chunks have the clock. Both are segmented into contractions,
//! the device torque is mapped onto the recorder timestamps and each sample
//! is paired with an EIT frame. The result is exported as a dataset of
//! `(EIT magnitudes, torque)` samples that [`analysis`] can project.
//!
//! The `eit-force-sync` binary drives the pipeline; see [`config`] for the
//! tunable parameters.

pub mod analysis;
pub mod config;
pub mod dataset;
pub mod eit;
pub mod error;
pub mod isoforce;
pub mod logging;
pub mod protocol;
pub mod report;
pub mod schedule;
pub mod signal;
pub mod sync;

pub use config::Settings;
pub use error::{AppResult, SyncError};
