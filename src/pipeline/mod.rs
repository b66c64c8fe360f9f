pub mod stats;

pub use stats::{StatisticsTracker, StatsSnapshot};
