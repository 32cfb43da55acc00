use std::time::Duration;

/// Statistics collected during one pipeline run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub lines_read: usize,
    pub lines_dropped: usize,
    pub lines_lost: usize,
    pub records_written: usize,
    pub batches_written: usize,
    pub generations: u64,
    pub recycles: usize,
    pub syncs: usize,
    pub sync_failures: usize,
    pub lost_deltas: usize,
    pub templates: usize,
    pub processing_time: Duration,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines accounted for: written, dropped with an error, or lost to a crash
    pub fn lines_accounted(&self) -> usize {
        self.records_written + self.lines_dropped + self.lines_lost
    }

    pub fn format_stats(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Lines processed: {} total, {} output, {} dropped",
            self.lines_read, self.records_written, self.lines_dropped
        ));

        if self.lines_lost > 0 {
            output.push_str(&format!(", {} lost", self.lines_lost));
        }

        output.push_str(&format!(
            "; Templates: {} after {} generations",
            self.templates, self.generations
        ));

        if self.syncs > 0 || self.sync_failures > 0 {
            output.push_str(&format!(", {} syncs", self.syncs));
            if self.sync_failures > 0 {
                output.push_str(&format!(" ({} failed)", self.sync_failures));
            }
        }

        if self.lost_deltas > 0 {
            output.push_str(&format!(", {} deltas lost", self.lost_deltas));
        }

        let processing_time_ms = self.processing_time.as_millis();
        output.push_str(&format!(" in {}ms", processing_time_ms));

        if processing_time_ms > 0 && self.lines_read > 0 {
            let lines_per_sec = (self.lines_read as f64 * 1000.0) / processing_time_ms as f64;
            output.push_str(&format!(" ({:.0} lines/s)", lines_per_sec));
        }

        output
    }
}
