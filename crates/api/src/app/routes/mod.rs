pub mod system;
pub mod tracker;
