//! # elif-relations: Container-managed relationships for elif.rs
//!
//! Maps bidirectional entity associations onto relational storage through a
//! foreign-key column or a relation table, and presents each association as a
//! plain single reference or a live collection. Fields load lazily, at most
//! once per session, keep both sides of every link consistent and support
//! cascade delete.
//!
//! ```ignore
//! let schema = RelationshipRegistry::new()
//!     .with_entity(EntityDescriptor::new("Order", "orders"))?
//!     .with_entity(EntityDescriptor::new("LineItem", "line_items"))?
//!     .with_association(AssociationDeclaration::new(
//!         "order-items",
//!         RoleDeclaration::to_many("Order", "items").cascade_delete(),
//!         RoleDeclaration::to_one("LineItem", "order")
//!             .with_foreign_key(ForeignKeyConfig::simple("order_id")),
//!     ))?
//!     .resolve()?;
//!
//! let manager = RelationManager::new(schema, store, RelationsConfig::from_env()?)?;
//! let mut session = manager.begin();
//! let order = session.identity("Order", 1)?;
//! session.related_set(&order, "items")?.add(PrimaryKey::from(5))?;
//! session.commit()?;
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod key;
pub mod loader;
pub mod metadata;
pub mod registry;
pub mod session;
pub mod set;
pub mod sql;
pub mod state;
pub mod store;

// Re-export the public surface
pub use cache::{CacheStatistics, RelationCache};
pub use config::{InstanceCacheConfig, RelationsConfig};
pub use context::PersistenceContext;
pub use error::*;
pub use field::{FieldId, RelationshipField};
pub use key::{EntityId, EntityIdentity, PrimaryKey};
pub use loader::{
    JoinTableLoader, LoaderStrategy, LocalForeignKeyLoader, OwnedForeignKeyLoader,
    RelationshipLoader,
};
pub use metadata::*;
pub use registry::{RelationSchema, RelationshipRegistry};
pub use session::{RelationManager, Session};
pub use set::{RelationshipCursor, RelationshipSet};
pub use sql::{Condition, Row, StatementKind, ToSql};
pub use state::{FieldState, ToManyState, ToOneState};
pub use store::{LoggingStore, MemoryStore, TableStore};
