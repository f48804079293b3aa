//! E2V readout correction lifecycle.
//!
//! - [`CorrectionLifecycleManager`] decides whether a correction stage exists
//!   and owns it together with its binding
//! - [`CorrectionBinding`] keeps the stage geometry in sync with the hardware
//! - [`E2vCorrectionStage`] is the stage installed in the processing pipeline

pub mod binding;
pub mod manager;
pub mod stage;

pub use binding::CorrectionBinding;
pub use manager::CorrectionLifecycleManager;
pub use stage::E2vCorrectionStage;
