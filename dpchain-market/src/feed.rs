//! Delegate price feeds for market-issued assets (§4.E "feed price").

use dpchain_core::{Price, PriceFeed};

pub const FEED_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// A snapshot of active delegates' price submissions for one market-issued
/// asset, as handed to the market engine by whatever assembles them from
/// account state (out of scope here — §1 treats the feed source as an
/// external input).
#[derive(Debug, Clone, Default)]
pub struct FeedSet {
    pub feeds: Vec<PriceFeed>,
}

impl FeedSet {
    pub fn new(feeds: Vec<PriceFeed>) -> Self {
        FeedSet { feeds }
    }

    fn active(&self, now: u64) -> Vec<Price> {
        self.feeds
            .iter()
            .filter(|f| now.saturating_sub(f.published_at) <= FEED_MAX_AGE_SECS)
            .map(|f| f.price)
            .collect()
    }

    /// `None` if fewer than `min_feeds` feeds are active, per §4.E
    /// "Absence fails the pair with insufficient_feeds".
    pub fn median_price(&self, now: u64, min_feeds: usize) -> Option<Price> {
        let mut active = self.active(now);
        if active.len() < min_feeds {
            return None;
        }
        active.sort();
        Some(active[active.len() / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpchain_core::Price;

    fn feed(delegate_id: u32, n: u64, d: u64, published_at: u64) -> PriceFeed {
        PriceFeed {
            delegate_id,
            price: Price::new(n, d, 1, 0),
            published_at,
        }
    }

    #[test]
    fn median_ignores_stale_feeds() {
        let set = FeedSet::new(vec![
            feed(1, 1, 1, 0),
            feed(2, 2, 1, 100_000), // stale relative to now=100_100
            feed(3, 3, 1, 100_050),
        ]);
        assert!(set.median_price(100_100, 2).is_none());
        assert!(set.median_price(100_100, 1).is_some());
    }

    #[test]
    fn median_of_three() {
        let set = FeedSet::new(vec![feed(1, 1, 1, 0), feed(2, 2, 1, 0), feed(3, 3, 1, 0)]);
        let median = set.median_price(0, 1).unwrap();
        assert_eq!(median, Price::new(2, 1, 1, 0));
    }
}
