pub mod annotate;
pub mod compile;
pub mod persist;
pub mod resolver;
pub mod save_and_sync;
pub mod synchronize;
pub mod validate;

pub use annotate::*;
pub use compile::*;
pub use persist::*;
pub use resolver::*;
pub use save_and_sync::*;
pub use synchronize::*;
pub use validate::*;
