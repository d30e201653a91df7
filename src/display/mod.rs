pub mod config;
pub mod fit;
