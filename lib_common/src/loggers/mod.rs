/// Installs the `tracing` subscriber and prunes old log files.
pub mod setup;
/// JSON-lines operational event log for the external log processor.
pub mod eventlog;

pub use eventlog::{EventLog, EventRecord, EventType};
pub use setup::init_tracing;
