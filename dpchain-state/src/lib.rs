//! Chain state store abstraction (§4.B) and the pending/overlay chain state
//! (§4.C). Ownership per §3: the committed store exclusively owns all
//! persisted tables; pending states are ephemeral and owned by whichever
//! evaluation context created them.

pub mod overlay;
pub mod pending;
pub mod store;

pub use overlay::Overlay;
pub use pending::PendingChainState;
pub use store::{ChainStore, MemoryChainStore};

/// `UndoState` is literally a free-standing `Overlay`: the set of mutations a
/// pending state applied to its parent, stored under the block id it undoes
/// (§3 "Undo state", §4.C "A pending state with a null parent is a
/// free-standing delta used to hold an undo record").
pub type UndoState = Overlay;
