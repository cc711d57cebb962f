//! Composite multi-tier caches built from the lattice cache core: a
//! directionally-probed/written tier list with background migration (C6), a
//! fan-out tier list with an explicit sync pass (C7), and a time-based
//! demotion cache (C8).

mod directional;
mod parallel;
mod time_based;
mod tier;

pub use directional::{Direction, DirectionalTierCache, MigrationStrategy};
pub use parallel::{ConflictResolution, ParallelCache, SyncOptions};
pub use time_based::TimeBasedHybridCache;
pub use tier::Tier;
