pub mod auth;
pub mod output;
