pub mod listing;
pub mod outliers;
pub mod relevance;
pub mod stats;
