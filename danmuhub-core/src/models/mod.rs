pub mod library;
pub mod pagination;
pub mod provider_info;
pub mod task;
pub mod token;

pub use library::{Anime, AnimeSource, Comment, Episode, MediaType};
pub use pagination::{Page, PageParams};
pub use provider_info::{EpisodeHint, ProviderEpisodeInfo, ProviderSearchInfo};
pub use task::{QueueType, TaskInfo, TaskStatus};
pub use token::{ApiToken, UaFilterMode, UaRule};

/// Opaque integer ids for the library graph.
pub type AnimeId = i64;
pub type SourceId = i64;
pub type EpisodeId = i64;
