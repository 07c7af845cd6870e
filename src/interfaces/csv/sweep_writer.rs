use crate::application::sweeper::SweepEntry;
use crate::error::Result;
use std::io::Write;

/// Writes per-order sweep results as CSV.
///
/// Wraps `csv::Writer`; the header row is written even when there are no
/// results, so the output is always a well-formed table.
pub struct SweepWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SweepWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
        Self { writer }
    }

    pub fn write_results(&mut self, results: &[SweepEntry]) -> Result<()> {
        self.writer.write_record([
            "order_id",
            "order_number",
            "previous_state",
            "new_state",
            "action",
            "message",
        ])?;
        for entry in results {
            self.writer.serialize(entry)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
