mod kinds;
mod router;
mod sink;

pub use kinds::{AlertKind, AlertRequest, ParseMode};
pub use router::AlertRouter;
pub use sink::{AlertSink, LoggingSink, SinkOutcome};
