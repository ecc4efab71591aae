//! Protocol implementations.

pub mod channel;
pub mod crc;
pub mod transfer;

// Re-export common types
pub use channel::Captured;
pub use transfer::{
    CancelToken, TransferConfig, TransferEvent, TransferSession, TransferState, Updater,
};
