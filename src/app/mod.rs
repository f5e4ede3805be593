pub mod auth;
pub mod notifications;
pub mod read_state;
