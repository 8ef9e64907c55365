pub mod core;
pub mod courses;
pub mod progress;
pub mod sheets;
