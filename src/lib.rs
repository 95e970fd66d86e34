pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use error::{SyncError, SyncResult, ValidationErrors};

pub use logic::{
    parse_relation_paths, CustomRule, DescriptorResolver, GraphSynchronizer, RuleCompiler,
    RuleContext, RuleRegistry, SaveAndSync, SyncOptions, Validator,
};

pub use model::*;

pub use store::{EntityRepository, MemoryStore, PostgresStore, Store, Transaction};
