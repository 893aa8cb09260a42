mod base;
pub mod instagram;
pub mod oauth;
pub mod post;
pub mod twitter;

pub use base::*;
