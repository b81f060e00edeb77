//! Resource model for stratus.
//!
//! This crate defines the schema layer: the dynamically shaped attribute values
//! the remote platform speaks (`AttrValue`), per-kind descriptors declaring
//! mutability and update groups (`ResourceDescriptor`), one typed struct per
//! resource kind with a hand-written diff function (`resources`), child-record
//! collections, identity filters and import-path parsing.

pub mod child;
pub mod descriptor;
pub mod diff;
pub mod error;
pub mod filter;
pub mod import;
pub mod resources;
pub mod types;
pub mod value;

pub use child::{children_value, observed_children, ChildMutation, ChildRecord};
pub use descriptor::{
    AttributeDescriptor, ChildSetDescriptor, LockLevel, Mutability, ParentRef,
    ResourceDescriptor, ResourceKind, UpdateGroup,
};
pub use diff::{AttributeChange, AttributeDiff, DiffBuilder};
pub use error::SchemaError;
pub use filter::{
    CompiledFilter, DateCondition, DateOp, FilterSpec, Lookup, MetadataMatch, TieBreak,
};
pub use import::ImportPath;
pub use resources::{
    metadata_pairs, parse_desired_file, parse_desired_str, ChildSet, DesiredResource, MetadataEntry,
    Resource, ResourceSpec,
};
pub use types::{ResourceId, ResourceKey, ScopeKey, TaskId};
pub use value::{insert_opt, AttrValue, Attributes};
