//! Shared utilities: the cookie sealing codec, token generation, and
//! redirect target validation

pub mod crypto;
pub mod redirect;
