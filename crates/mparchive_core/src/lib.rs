//! Archive core: pure article model, lifecycle state machine and heuristic tables.
mod metadata;
mod record;
mod rules;
mod source_url;
mod status;

pub use metadata::Metadata;
pub use record::{ArticleId, ArticleRecord, PENDING_TITLE};
pub use rules::{EmojiRules, NoiseRules};
pub use source_url::{canonical_source_url, SourceUrlError};
pub use status::{transition, ArticleStatus, LifecycleEvent, TransitionError};
