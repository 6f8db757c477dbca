pub mod aggregator;
pub mod dispatcher;
pub mod profile;
pub mod simulator;
pub mod stream;
pub mod target;
