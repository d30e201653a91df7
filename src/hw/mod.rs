pub mod component;
pub mod session;
pub mod sim;
pub mod types;
