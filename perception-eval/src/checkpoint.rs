//! Saving model snapshots on improvement.

use crate::common::*;

/// A persisted bundle of training progress and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub step: usize,
    pub best_fitness: Option<f64>,
    pub model: serde_json::Value,
    #[serde(default)]
    pub optimizer: Option<serde_json::Value>,
    pub saved_at: DateTime<Local>,
}

/// File name of the checkpoint kept for the best fitness.
pub fn best_checkpoint_name(compound_coef: usize) -> String {
    format!("efficientdet-d{}_best.json", compound_coef)
}

/// File name of the checkpoint saved for a new lowest loss.
pub fn step_checkpoint_name(compound_coef: usize, epoch: usize, step: usize) -> String {
    format!("efficientdet-d{}_{}_{}.json", compound_coef, epoch, step)
}

pub trait CheckpointStore {
    fn save(&mut self, name: &str, checkpoint: &Checkpoint) -> Result<()>;
}

/// Writes checkpoints as JSON files into a directory.
#[derive(Debug, Clone)]
pub struct DirCheckpointStore {
    dir: PathBuf,
}

impl DirCheckpointStore {
    pub fn new<P>(dir: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create checkpoint dir '{}'", dir.display()))?;
        Ok(Self {
            dir: dir.to_owned(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self, name: &str) -> Result<Checkpoint> {
        let path = self.dir.join(name);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read checkpoint '{}'", path.display()))?;
        let checkpoint = serde_json::from_str(&text)?;
        Ok(checkpoint)
    }
}

impl CheckpointStore for DirCheckpointStore {
    fn save(&mut self, name: &str, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.dir.join(name);
        let writer = BufWriter::new(
            fs::File::create(&path)
                .with_context(|| format!("failed to create checkpoint '{}'", path.display()))?,
        );
        serde_json::to_writer(writer, checkpoint)?;
        info!("saved checkpoint '{}'", path.display());
        Ok(())
    }
}

/// Keeps checkpoints in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    pub saved: IndexMap<String, Checkpoint>,
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, name: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.saved.insert(name.to_string(), checkpoint.clone());
        Ok(())
    }
}
