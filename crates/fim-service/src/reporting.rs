use fim_core::{ChangeEvent, ReportSink, ScanWarning};
use std::sync::Arc;
use tracing::{info, warn};

/// Writes each change and warning to the tracing log, one line apiece.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn changes(&self, events: &[ChangeEvent]) {
        for event in events {
            info!("{}", event);
        }
    }

    fn warning(&self, warning: &ScanWarning) {
        warn!(kind = ?warning.kind, "{}", warning);
    }
}

/// Delivers every batch to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ReportSink for FanoutSink {
    fn changes(&self, events: &[ChangeEvent]) {
        for sink in &self.sinks {
            sink.changes(events);
        }
    }

    fn warning(&self, warning: &ScanWarning) {
        for sink in &self.sinks {
            sink.warning(warning);
        }
    }

    fn warnings(&self, warnings: &[ScanWarning]) {
        for sink in &self.sinks {
            sink.warnings(warnings);
        }
    }
}
