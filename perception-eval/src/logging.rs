//! Scalar summaries of validation passes.

use crate::common::*;
use tfrecord::{EventWriter, EventWriterConfig};

pub const LOSS_TAG: &str = "Loss/val";
pub const REGRESSION_LOSS_TAG: &str = "Regression_loss/val";
pub const CLASSIFICATION_LOSS_TAG: &str = "Classfication_loss/val";
pub const SEGMENTATION_LOSS_TAG: &str = "Segmentation_loss/val";
pub const PRECISION_TAG: &str = "Metrics/precision";
pub const RECALL_TAG: &str = "Metrics/recall";
pub const MAP50_TAG: &str = "Metrics/mAP50";
pub const MAP_TAG: &str = "Metrics/mAP50-95";
pub const MEAN_IOU_TAG: &str = "Metrics/mIoU";
pub const MEAN_F1_TAG: &str = "Metrics/mF1";

/// Destination of tagged scalar values.
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, step: usize, value: f64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes TensorBoard event files.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct EventSink {
    #[derivative(Debug = "ignore")]
    event_writer: EventWriter<BufWriter<fs::File>>,
}

impl EventSink {
    /// Create an event file under `logging_dir/events`.
    pub fn new<P>(logging_dir: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let event_dir = logging_dir.as_ref().join("events");
        fs::create_dir_all(&event_dir)
            .with_context(|| format!("failed to create event dir '{}'", event_dir.display()))?;

        let event_path_prefix = event_dir
            .join("perception-eval")
            .into_os_string()
            .into_string()
            .map_err(|path| format_err!("non-UTF-8 event path {:?}", path))?;

        let event_writer =
            EventWriter::from_prefix(event_path_prefix, "", EventWriterConfig::default())?;
        Ok(Self { event_writer })
    }
}

impl MetricsSink for EventSink {
    fn add_scalar(&mut self, tag: &str, step: usize, value: f64) -> Result<()> {
        self.event_writer
            .write_scalar(tag, step as i64, value as f32)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.event_writer.flush()?;
        Ok(())
    }
}

/// Collects scalars in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub scalars: Vec<(String, usize, f64)>,
}

impl MemorySink {
    /// The last value recorded for `tag`.
    pub fn last(&self, tag: &str) -> Option<f64> {
        self.scalars
            .iter()
            .rev()
            .find(|(name, _, _)| name == tag)
            .map(|&(_, _, value)| value)
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, step: usize, value: f64) -> Result<()> {
        self.scalars.push((tag.to_string(), step, value));
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn add_scalar(&mut self, _tag: &str, _step: usize, _value: f64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_last_value() -> Result<()> {
        let mut sink = MemorySink::default();
        sink.add_scalar(LOSS_TAG, 1, 0.5)?;
        sink.add_scalar(MAP_TAG, 1, 0.1)?;
        sink.add_scalar(LOSS_TAG, 2, 0.25)?;
        assert_eq!(sink.last(LOSS_TAG), Some(0.25));
        assert_eq!(sink.last(MEAN_F1_TAG), None);
        Ok(())
    }

    #[test]
    fn event_sink_writes_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let mut sink = EventSink::new(dir.path())?;
            sink.add_scalar(LOSS_TAG, 0, 1.5)?;
            sink.flush()?;
        }
        let num_files = fs::read_dir(dir.path().join("events"))?.count();
        assert!(num_files >= 1);
        Ok(())
    }
}
