//! CSV writers for pipeline output.

use crate::{Error, Result};
use ibdscan_core::{ClassifiedHit, CoincidenceEvent, EventSink, HitClass};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

const PULSE_HEADER: &str = "evt,seg,E,t,y,PSD,PID";
const EVENT_HEADER: &str =
    "evt,cluster,t_offset,t_median,n_hits,n_ioni,n_ncapt,n_recoil,n_veto,E_ioni,veto,ibd";

/// Writes one row per classified response pulse.
///
/// `PID` is [`HitClass::code`].
pub struct CsvPulseSink<W: Write = BufWriter<File>> {
    writer: W,
    rows: usize,
}

impl CsvPulseSink {
    /// Creates the file and writes the header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let sink = Self::from_writer(BufWriter::new(File::create(path)?))?;
        log::info!("writing pulses to {}", path.display());
        Ok(sink)
    }
}

impl<W: Write> CsvPulseSink<W> {
    /// Wraps an open writer and writes the header.
    ///
    /// # Errors
    /// Returns an error if the header cannot be written.
    pub fn from_writer(mut writer: W) -> Result<Self> {
        writeln!(writer, "{PULSE_HEADER}")?;
        Ok(Self { writer, rows: 0 })
    }

    /// Data rows written so far.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> EventSink for CsvPulseSink<W> {
    type Error = Error;

    fn write_hits(&mut self, hits: &[ClassifiedHit]) -> Result<()> {
        for hit in hits {
            let p = &hit.pulse;
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{}",
                p.event_id,
                p.volume_id,
                p.energy,
                p.time,
                p.position,
                p.psd,
                hit.class.code()
            )?;
        }
        self.rows += hits.len();
        Ok(())
    }

    fn write_event(&mut self, _event: &CoincidenceEvent) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes one row per prompt cluster of every coincidence event.
///
/// `ibd` is the event's IBD-like multiplicity (0 if not IBD-like), repeated
/// on each of its rows.
pub struct CsvEventSink<W: Write = BufWriter<File>> {
    writer: W,
    rows: usize,
}

impl CsvEventSink {
    /// Creates the file and writes the header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let sink = Self::from_writer(BufWriter::new(File::create(path)?))?;
        log::info!("writing coincidence events to {}", path.display());
        Ok(sink)
    }
}

impl<W: Write> CsvEventSink<W> {
    /// Wraps an open writer and writes the header.
    ///
    /// # Errors
    /// Returns an error if the header cannot be written.
    pub fn from_writer(mut writer: W) -> Result<Self> {
        writeln!(writer, "{EVENT_HEADER}")?;
        Ok(Self { writer, rows: 0 })
    }

    /// Data rows written so far.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> EventSink for CsvEventSink<W> {
    type Error = Error;

    fn write_hits(&mut self, _hits: &[ClassifiedHit]) -> Result<()> {
        Ok(())
    }

    fn write_event(&mut self, event: &CoincidenceEvent) -> Result<()> {
        let ibd = event.is_ibd_like();
        for (index, cluster) in event.clusters.iter().enumerate() {
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                event.event_id,
                index,
                event.time_offset,
                cluster.median_time(),
                cluster.hits.len(),
                cluster.count(HitClass::Ionization),
                cluster.count(HitClass::NeutronCapture),
                cluster.count(HitClass::Recoil),
                cluster.count(HitClass::Veto),
                cluster.ionization_energy(),
                u8::from(cluster.has_veto()),
                ibd
            )?;
        }
        self.rows += event.clusters.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Pulse and event tables written side by side into one directory.
pub struct CsvOutput {
    /// `pulses.csv`
    pub pulses: CsvPulseSink,
    /// `events.csv`
    pub events: CsvEventSink,
}

impl CsvOutput {
    /// Creates `dir` if needed and opens `pulses.csv` and `events.csv` in it.
    ///
    /// # Errors
    /// Returns an error if the directory or either file cannot be created.
    pub fn create_in<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            pulses: CsvPulseSink::create(dir.join("pulses.csv"))?,
            events: CsvEventSink::create(dir.join("events.csv"))?,
        })
    }
}

impl EventSink for CsvOutput {
    type Error = Error;

    fn write_hits(&mut self, hits: &[ClassifiedHit]) -> Result<()> {
        self.pulses.write_hits(hits)
    }

    fn write_event(&mut self, event: &CoincidenceEvent) -> Result<()> {
        self.events.write_event(event)
    }

    fn flush(&mut self) -> Result<()> {
        self.pulses.flush()?;
        self.events.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibdscan_core::{PromptCluster, ResponsePulse};
    use tempfile::{tempdir, NamedTempFile};

    fn hit(volume_id: i32, energy: f64, time: f64, class: HitClass) -> ClassifiedHit {
        ClassifiedHit::new(
            ResponsePulse {
                event_id: 3,
                volume_id,
                energy,
                time,
                position: -12.5,
                psd: 0.14,
                ..Default::default()
            },
            class,
        )
    }

    fn ibd_event() -> CoincidenceEvent {
        let mut prompt = PromptCluster::start(hit(5, 1.5, 0.0, HitClass::Ionization));
        prompt.push(hit(6, 0.25, 4.0, HitClass::Ionization));
        let capture = PromptCluster::start(hit(5, 0.5, 5e4, HitClass::NeutronCapture));
        let mut event = CoincidenceEvent::new(3).with_time_offset(1000.0);
        event.clusters = vec![prompt, capture];
        event.finalize();
        event
    }

    #[test]
    fn test_pulse_rows() {
        let file = NamedTempFile::new().unwrap();
        let mut sink = CsvPulseSink::create(file.path()).unwrap();
        sink.write_hits(&[
            hit(5, 1.5, 0.0, HitClass::Ionization),
            hit(1001, 2.0, 20.0, HitClass::Veto),
        ])
        .unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.rows(), 2);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "evt,seg,E,t,y,PSD,PID");
        assert_eq!(lines[1], "3,5,1.5,0,-12.5,0.14,1");
        assert_eq!(lines[2], "3,1001,2,20,-12.5,0.14,4");
    }

    #[test]
    fn test_event_rows() {
        let mut sink = CsvEventSink::from_writer(Vec::new()).unwrap();
        sink.write_event(&ibd_event()).unwrap();
        let content = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "3,0,1000,4,2,2,0,0,0,1.75,0,2");
        assert_eq!(lines[2], "3,1,1000,50000,1,0,1,0,0,0,0,2");
    }

    #[test]
    fn test_output_directory() {
        let dir = tempdir().unwrap();
        let mut out = CsvOutput::create_in(dir.path().join("run1")).unwrap();
        let event = ibd_event();
        out.write_hits(&event.clusters[0].hits).unwrap();
        out.write_event(&event).unwrap();
        out.flush().unwrap();

        let pulses = std::fs::read_to_string(dir.path().join("run1/pulses.csv")).unwrap();
        let events = std::fs::read_to_string(dir.path().join("run1/events.csv")).unwrap();
        assert_eq!(pulses.lines().count(), 3);
        assert_eq!(events.lines().count(), 3);
    }
}
