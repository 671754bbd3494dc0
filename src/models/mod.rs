pub mod api;
pub mod recognition;
pub mod scan;
