//! Category feeds: first page snapshots, incremental loading and reset.

mod state;
mod store;

pub use state::CategoryState;
pub use store::PaginationStore;
