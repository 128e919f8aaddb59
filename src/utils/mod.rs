//! Error type and filesystem locations shared by the services.

pub mod error;
pub mod paths;

pub use error::*;
pub use paths::*;
