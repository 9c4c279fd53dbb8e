pub mod clock;
pub mod ledger;
pub mod notify;
pub mod server;
pub mod storage;
pub mod sweeper;
