pub mod common;
pub mod context;
pub mod entity;
pub mod path_tree;
pub mod relation;
pub mod rules;
pub mod schema;

pub use common::*;
pub use context::*;
pub use entity::*;
pub use path_tree::*;
pub use relation::*;
pub use rules::*;
pub use schema::*;
