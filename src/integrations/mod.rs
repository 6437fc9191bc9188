//! External service integrations.

pub mod image_client {
    pub use crate::image_client::*;
}
