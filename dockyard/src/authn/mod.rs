//! Credentials: bearer tokens and the admin password hash

pub mod access_token;
pub mod password;
