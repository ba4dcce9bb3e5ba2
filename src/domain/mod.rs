//! Domain layer types and invariants.

pub mod card;
pub mod entities;
pub mod error;
pub mod template;
