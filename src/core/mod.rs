//! Core logic: configuration, template model, ordering, composition, planning.

pub mod composer;
pub mod error;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod template;
pub mod types;
