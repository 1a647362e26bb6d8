//! Common types shared by every rate limiting algorithm.

pub mod common;
pub mod decision;
pub mod serde_helpers;

pub use common::*;
pub use decision::Decision;
