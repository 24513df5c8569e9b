pub mod auth_service;

pub use auth_service::{AuthCache, AuthIdentity};
