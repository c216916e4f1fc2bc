//! File system storage
//!
//! Virtual path handling, file open modes and listing record rendering.

pub mod listing;
pub mod operations;
pub mod validation;

pub use listing::{ListingMode, MlstFacts};
pub use validation::{build_path, cd_up, decode_path, encode_path, virtual_to_real_path};
