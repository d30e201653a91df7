pub mod gif;
pub mod probe;
pub mod software;
