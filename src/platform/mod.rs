pub mod daemon;
pub mod enable;
