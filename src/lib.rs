//! # Asset Ingest
//!
//! A library for turning uploaded financial statements (CSV, spreadsheets and
//! PDFs) into reconciled, deduplicated net-worth snapshots.
//!
//! ## Pipeline
//!
//! - **Format Router**: picks an extractor from extension or MIME type and enforces size limits
//! - **Extractors**: header-matched tables, headerless tables, oracle-assisted and OCR fallbacks
//! - **Statement Date Resolver**: document content, then filename, then upload time
//! - **Security Classifier**: lookup, keyword rules and AI tiers over a closed taxonomy
//! - **Duplicate Detector**: transitive name matching within a batch and against existing holdings
//! - **Snapshot Matcher**: merge/prompt/create proposals from statement-date distance
//! - **Review Staging Store**: editable, autosaving review sessions
//! - **Finalizer**: commits the selected assets into a new or existing snapshot
//!
//! ## Example
//!
//! ```rust,ignore
//! use asset_ingest::*;
//! use std::sync::Arc;
//!
//! let pipeline = IngestionPipeline::builder(
//!     Arc::new(InMemoryPortfolioStore::new()),
//!     Arc::new(InMemoryStagingRepository::new()),
//! )
//! .build()?;
//!
//! let csv = "Name,Value\nHDFC Bank,150000\n,5000\nGold ETF,-10\n";
//! let summary = pipeline
//!     .ingest("user-1", &[UploadedFile::new("holdings_30-11-2024.csv", csv)], None)
//!     .await?;
//!
//! let session = summary.sessions[0].session_id;
//! pipeline.review(session).await?;
//! let result = pipeline.finalize(session, &FinalizeOptions::default()).await?;
//! assert_eq!(result.assets_saved, 1);
//! ```

pub mod api;
pub mod classifier;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod extract;
pub mod finalize;
pub mod llm;
pub mod lookup;
pub mod pipeline;
pub mod router;
pub mod schema;
pub mod snapshot_matcher;
pub mod staging;
pub mod statement_date;
pub mod store;
pub mod taxonomy;
pub mod utils;

pub use api::{ApiError, ApiResponse, PipelineApi};
pub use classifier::{
    ClassificationBatch, ClassificationFailure, ClassificationProgress, ClassificationStrategy,
    SecurityClassifier,
};
pub use config::PipelineConfig;
pub use duplicates::{
    smart_merge, DuplicateDetector, DuplicateGroup, Recommendation, Resolution, ResolutionOutcome,
};
pub use error::{ErrorKind, FinalizeError, IngestError, Result};
pub use extract::{DocumentExtractor, ExtractionMethod, ExtractionOutput};
pub use finalize::{FinalizeOptions, FinalizeResult, Finalizer};
pub use llm::{ClassificationOracle, PageImage, PageRasterizer};
pub use lookup::{InMemorySecurityLookup, LookupResult, NoLookup, SecurityLookupOracle};
pub use pipeline::{BatchSummary, FileOutcome, FileStatus, IngestEvent, IngestionPipeline, SessionSummary};
pub use router::{FileFormat, FormatRouter, UploadedFile};
pub use schema::*;
pub use snapshot_matcher::{ProximityGroup, SnapshotMatcher};
pub use staging::{AutoSaver, ReviewStagingStore, SessionView};
pub use statement_date::StatementDateResolver;
pub use store::{InMemoryPortfolioStore, InMemoryStagingRepository, PortfolioStore, StagingRepository};
pub use taxonomy::{SubclassDefinition, Taxonomy};

#[cfg(feature = "gemini")]
pub use llm::GeminiClient;
