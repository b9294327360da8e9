//! Data models for the Oink backend.

mod package;
mod user;
mod version;

pub use package::*;
pub use user::*;
pub use version::*;
