pub mod analytics;
pub mod core;
pub mod prediction;
pub mod quiz;
pub mod records;
