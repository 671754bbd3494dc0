pub mod encryption;
pub mod recognition;
pub mod staging;
