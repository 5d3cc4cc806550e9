pub mod api;
pub mod error;
pub mod models;
pub mod quota;

pub use error::{Result, WishError};
