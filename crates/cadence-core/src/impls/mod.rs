//! Impls - ports の in-memory 実装
//!
//! Good enough for the CLI simulator and for tests; real platform
//! integrations implement the same traits elsewhere.

pub mod inmem_crash_store;
pub mod manual_clock;
pub mod static_power;

pub use self::inmem_crash_store::InMemoryCrashStateStore;
pub use self::manual_clock::ManualClock;
pub use self::static_power::StaticPowerSource;
