pub mod handlers;
pub mod loader;
