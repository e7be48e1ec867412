//! List views: query state, response normalization and reload coordination

mod coordinator;
mod live;
mod normalize;
mod query;

pub use coordinator::{ReloadCoordinator, ReloadOutcome, ViewObserver, ViewState};
pub use live::{LiveView, IMPORT_HISTORY_NOTICE};
pub use normalize::{normalize, size_hint, ListEnvelope};
pub use query::{PageQuery, QueryPatch, SortDir};
