pub mod caller;
pub mod health_handlers;
pub mod media_handlers;
pub mod session_handlers;
pub mod theme_handlers;
