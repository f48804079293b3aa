//! # Frelon Sync
//!
//! State synchronization between a Frelon detector, its software mirrors and
//! the acquisition processing pipeline.
//!
//! The hardware can be reconfigured through the structured API and through
//! raw serial commands. This crate keeps three sources of truth coherent:
//! the geometry owned by the detector interface, the device registers, and
//! the E2V correction stage of the processing pipeline.
//!
//! ## Crate Structure
//!
//! - **`correction`**: lifecycle of the E2V correction stage and the binding
//!   that keeps its geometry in sync with binning and ROI changes.
//! - **`serial`**: serial line grammar and reconciliation of the software
//!   mirrors after monitored register sets.
//! - **`period`**: incremental least-squares frame period estimation.
//! - **`hardware`**: capability traits the detector interface implements.
//! - **`notifier`**: change notification registry used by geometry owners.
//! - **`geometry`**: binning, ROI and chip models.
//! - **`observable`** / **`mirrors`**: software-side parameter mirrors.
//! - **`simulated`**: in-process detector implementing every facet.
//! - **`sync`**: the `DetectorSync` facade.
//! - **`config`**, **`logging`**, **`error`**: ambient infrastructure.

pub mod config;
pub mod correction;
pub mod error;
pub mod geometry;
pub mod hardware;
pub mod logging;
pub mod mirrors;
pub mod notifier;
pub mod observable;
pub mod period;
pub mod serial;
pub mod simulated;
pub mod sync;

pub use error::{SyncError, SyncResult};
pub use sync::DetectorSync;
