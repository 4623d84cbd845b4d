pub mod auth;

pub use auth::intake_auth;
