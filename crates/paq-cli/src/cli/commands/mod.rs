mod checksum;
mod fetch;
mod probe;

pub use checksum::run_checksum;
pub use fetch::run_fetch;
pub use probe::run_probe;
