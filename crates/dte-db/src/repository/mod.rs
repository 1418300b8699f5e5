//! # Repository Module
//!
//! ## Available Repositories
//!
//! - [`SequenceRepository`](sequence::SequenceRepository) - Control number counters
//! - [`DocumentRepository`](document::DocumentRepository) - Issued documents and status
//! - [`ContingencyRepository`](contingency::ContingencyRepository) - Contingency queue and batches

pub mod contingency;
pub mod document;
pub mod sequence;
