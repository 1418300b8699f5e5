//! # dte-db: Storage Layer for Electronic Tax Documents
//!
//! SQLite persistence via sqlx: control number sequences, issued documents
//! and the contingency queue.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Issuance Data Flow                               │
//! │                                                                         │
//! │  DteService::create                                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     dte-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Sequence      │    │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ Document      │    │              │  │   │
//! │  │   │ Transactions  │    │ Contingency   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │           ▲                                                     │   │
//! │  │   ┌───────┴───────────┐                                         │   │
//! │  │   │ SequenceAllocator │  control numbers under the write lock   │   │
//! │  │   └───────────────────┘                                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dte_db::{Database, DbConfig, SequenceAllocator};
//!
//! let db = Database::new(DbConfig::new("dte.db")).await?;
//! let allocator = SequenceAllocator::new(db.clone(), Arc::new(SystemClock));
//! let number = allocator.allocate_next(&issuer, DocumentType::Invoice).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocator;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use allocator::{RetryPolicy, SequenceAllocator};
pub use error::{DbError, DbResult};
pub use migrations::MigrationStatus;
pub use pool::{Database, DbConfig};

pub use repository::contingency::{
    BatchOutcome, BatchSummary, ContingencyRecord, ContingencyRepository, ContingencyStatus,
    DocumentOutcome,
};
pub use repository::document::{DocumentRepository, NewDocument, StoredDocument};
pub use repository::sequence::SequenceRepository;
