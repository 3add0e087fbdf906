pub mod config;
pub mod logging;

pub mod error;
pub mod hash;
pub mod item;
pub mod method;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod verify;
pub mod worker;
