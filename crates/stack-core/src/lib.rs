//! Stack Core Library
//!
//! Deterministic block-stacking simulation on top of `Rapier2D`: variant
//! selection, the drop/landing cycle of the active block, and tower
//! stabilization. Rendering and input live elsewhere; this crate only
//! advances state one fixed frame at a time.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod block;
pub mod collab;
pub mod config;
pub mod game;
pub mod landing;
pub mod monitor;
pub mod physics;
pub mod scheduler;
pub mod selector;
pub mod stabilizer;
pub mod sync;
pub mod variant;

#[cfg(test)]
pub(crate) mod test_utils;

pub use block::{Block, BlockId, BlockManager, LifecycleError, LifecycleState, Settlement};
pub use collab::{NoTimedMode, ScoreAccumulator, ScoreBoard, TimeAttack, TimedMode};
pub use config::{ConfigError, GroundConfig, StackConfig};
pub use game::{StackGame, TickReport};
pub use landing::{LandingConfig, LandingDetector, LandingStatus};
pub use monitor::{MonitorConfig, StabilityAlert, StabilityMonitor};
pub use physics::{PHYSICS_DT, PhysicsWorld, default_gravity};
pub use scheduler::{DropScheduler, SchedulerEvent, SchedulerState, SweepConfig};
pub use selector::{SelectError, SelectionPolicy, VariantSelector};
pub use stabilizer::{
    SessionSummary, StabilizationSession, StabilizeError, StabilizePhase, StabilizerConfig,
    StabilizerEvent, TowerStabilizer,
};
pub use sync::{SnapshotError, StackSnapshot};
pub use variant::{BlockVariant, Color, Footprint, VariantCatalog};
