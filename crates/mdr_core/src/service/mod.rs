//! Use-case services.
//!
//! # Responsibility
//! - Compose repositories into the versioned-entity façade.
//! - Own the read cache and outbound collaborator contracts.

pub mod cache;
pub mod collaborators;
pub mod versioned_entity;
