//! Feeds, subscriptions and articles.

mod store;
mod types;

pub use store::{FeedStore, SqliteFeedStore};
pub use types::{
    Article, Feed, FetchValidators, FetchedMeta, NewArticle, ReadTransition, Subscription,
};
