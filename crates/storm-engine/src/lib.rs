pub mod bots;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod parser;
pub mod scenario;

pub use engine::aggregator::{MetricsAggregator, MetricsSnapshot};
pub use engine::profile::{IntensityProfile, StreamIntensity, ATTACK_PRESETS};
pub use error::{ConfigurationError, StreamError, UnitError};
pub use scenario::{Controller, Scenario, ScenarioRegistry};
