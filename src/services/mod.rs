pub mod asset_service;
pub mod cleanup;
pub mod codec;
pub mod files;
pub mod layout;
pub mod promoter;
pub mod session_service;
pub mod slot_validator;
pub mod theme_service;
pub mod theme_validator;
