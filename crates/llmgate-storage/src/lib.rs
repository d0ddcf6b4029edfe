pub mod activity;
pub mod entities;
pub mod memory;
pub mod seaorm;
pub mod storage;

pub use activity::{ActivityLogger, ActivityLoggerConfig};
pub use memory::MemoryStorage;
pub use seaorm::SeaOrmStorage;
pub use storage::{
    AuthRecord, CreditTransactionRow, DeltaOutcome, NewActivityEvent, NewCreditTransaction,
    Storage, StorageError, StorageResult, UserKeyRow, UserRow,
};
