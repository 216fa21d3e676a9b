pub mod panel;
pub mod period;
pub mod series;
