pub mod error;
pub mod project;
pub mod series;
