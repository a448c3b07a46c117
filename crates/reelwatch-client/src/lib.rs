pub mod feed;
mod http;
pub mod invalid_log;
pub mod radarr;

pub use feed::{NewznabFeedSource, parse_feed};
pub use invalid_log::InvalidItemLog;
pub use radarr::{RadarrOptions, RadarrSink};
