pub mod decode;
pub mod render;
pub mod resize;
