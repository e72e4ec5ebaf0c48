pub mod chart;
pub mod text;
