//! Output contract for classified pulses and coincidence events.

use crate::error::Error;
use crate::event::{ClassifiedHit, CoincidenceEvent};

/// Destination for pipeline output, owned by the caller for one run.
///
/// Pipeline errors are converted into the sink's error type, so drivers
/// return a single error to their caller.
pub trait EventSink {
    /// Error raised by the underlying writer.
    type Error;

    /// Receives every classified pulse of one event, dead hits included.
    fn write_hits(&mut self, hits: &[ClassifiedHit]) -> Result<(), Self::Error>;

    /// Receives one finalized coincidence event.
    fn write_event(&mut self, event: &CoincidenceEvent) -> Result<(), Self::Error>;

    /// Flushes buffered output.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// In-memory sink that keeps everything it is given.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub hits: Vec<ClassifiedHit>,
    pub events: Vec<CoincidenceEvent>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for MemorySink {
    type Error = Error;

    fn write_hits(&mut self, hits: &[ClassifiedHit]) -> Result<(), Self::Error> {
        self.hits.extend_from_slice(hits);
        Ok(())
    }

    fn write_event(&mut self, event: &CoincidenceEvent) -> Result<(), Self::Error> {
        self.events.push(event.clone());
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    type Error = S::Error;

    fn write_hits(&mut self, hits: &[ClassifiedHit]) -> Result<(), Self::Error> {
        (**self).write_hits(hits)
    }

    fn write_event(&mut self, event: &CoincidenceEvent) -> Result<(), Self::Error> {
        (**self).write_event(event)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        (**self).flush()
    }
}
