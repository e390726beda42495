pub mod market;
pub mod news;
pub mod recommendation;
pub mod report;
