//! Service modules for content-tree migration
//!
//! Store clients sit behind the [`ContentStore`](crate::types::ContentStore) and
//! [`AssetStore`](crate::types::AssetStore) traits; everything above them works
//! only through those traits.

pub mod asset_resolver;
pub mod brandfolder_client;
pub mod cache_flush;
pub mod contentstack_client;
pub mod entry_repository;
pub mod http;
pub mod rate_limit;
pub mod rollback;
pub mod tree_deleter;
pub mod tree_materializer;
pub mod workflow_advancer;

pub use asset_resolver::{AssetPolicy, AssetResolver, AssetSummary};
pub use brandfolder_client::BrandfolderClient;
pub use cache_flush::CacheFlusher;
pub use contentstack_client::ContentstackClient;
pub use entry_repository::{
    EntryRepository, FieldMatcher, MatcherRegistry, RepositoryOptions, ReuseMatcher, TitleMatcher, MIGRATION_TAG,
};
pub use rollback::{CreationLedger, RollbackCoordinator, RollbackIncomplete, RollbackOutcome};
pub use tree_deleter::{DeletionSummary, TreeDeleter};
pub use tree_materializer::{MaterializationResult, MaterializePolicy, NodeStatus, TreeMaterializer};
pub use workflow_advancer::{WorkflowAdvancer, WorkflowPolicy, WorkflowStage};
