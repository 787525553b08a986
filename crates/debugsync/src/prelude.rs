//! Prelude for debugsync.
//!
//! ```rust
//! use debugsync::prelude::*;
//!
//! let lock = RwLock::new(Vec::<u8>::new()).named("buffer");
//! lock.write().push(1);
//! assert_eq!(lock.read().len(), 1);
//! ```

pub use crate::channel::{Channel, TimeoutCallbacks};
pub use crate::config::{ChannelConfig, DebugsyncConfig, Policy};
pub use crate::context::{Canceller, Context};
pub use crate::diagnostics::{DiagnosticEvent, DiagnosticSink, Diagnostics, EventKind, Operation};
pub use crate::error::{ExpiryCause, SendError, SyncError, SyncResult};
pub use crate::mutex::{Mutex, RawMutex};
pub use crate::rwlock::{RawRwLock, RwLock};
pub use crate::wait_group::WaitGroup;
