pub mod purge;

pub use purge::PurgeScheduler;
