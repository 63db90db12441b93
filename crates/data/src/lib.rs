pub mod feed;
pub mod persistence;
pub mod reporter;

pub use feed::CandleFeed;
pub use persistence::{PersistedState, PersistenceError, StatePersistence};
pub use reporter::FileReporter;
