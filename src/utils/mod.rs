pub mod serde_helpers;
pub mod visitor;
