pub mod live_feed;

pub use live_feed::LiveFeed;
