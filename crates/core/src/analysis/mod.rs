pub mod engine;
pub mod pipeline;
pub mod sentiment;
pub mod trend;
