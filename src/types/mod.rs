pub mod chart;
pub mod search;
