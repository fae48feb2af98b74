//! External feed clients. Both upstreams are consumed as opaque network
//! services behind traits so the engine can run against in-memory fakes.

pub mod pitch_feed;
pub mod play_index;

pub use pitch_feed::{PitchFeed, PitchFeedClient};
pub use play_index::{PlayIndexClient, PlayIndexFeed, RawGameFeed};
