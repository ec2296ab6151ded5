/// Mailbox watching: the idle/reconnect state machine and its task wrapper
pub mod idle_loop;
pub mod worker;

pub use idle_loop::{IngestLoop, LoopSettings, LoopState};
pub use worker::IngestWorker;
