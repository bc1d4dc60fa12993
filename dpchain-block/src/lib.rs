//! Block application (§4.F/§4.G): genesis seeding and the `BlockProcessor`
//! that carries a single block (or a fork switch) through header
//! verification, delegate accounting, the market pass, and the transaction
//! pass.

pub mod genesis;
pub mod processor;

pub use genesis::open_or_init;
pub use processor::{BlockProcessor, FeedProvider, NoFeeds};
