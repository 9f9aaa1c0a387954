//! Domain model module declarations.

pub mod action;
pub mod message;
pub mod prospect;
pub mod validation;
