use anyhow::{Context, Result};
use log::info;
use perception_eval::{
    checkpoint::MemoryCheckpointStore,
    config::ProjectConfig,
    data::{JsonLinesDataset, PrefetchLoader},
    evaluator::{BestState, EvalMode, Evaluator},
    logging::{EventSink, MetricsSink, NullSink},
    model::{load_weights, RecordedModel},
};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
/// Evaluate detection and segmentation outputs on a validation set
struct Args {
    #[structopt(short, long, default_value = "coco")]
    /// project name, loaded from projects/<name>.json5
    pub project: String,
    #[structopt(short, long, default_value = "0")]
    /// model size variant
    pub compound_coef: usize,
    #[structopt(short, long)]
    /// weights file, defaults to weights/efficientdet-d<compound_coef>.json
    pub weights: Option<PathBuf>,
    #[structopt(long)]
    /// write TensorBoard events into this directory
    pub logging_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let Args {
        project,
        compound_coef,
        weights,
        logging_dir,
    } = Args::from_args();
    let weights = weights
        .unwrap_or_else(|| format!("weights/efficientdet-d{}.json", compound_coef).into());

    let mut config = ProjectConfig::open_project(".", &project)?;
    config.eval.compound_coef = compound_coef;
    info!("project '{}': {:?}", project, config);

    let mut model: RecordedModel = load_weights(&weights)
        .with_context(|| format!("failed to load weights '{}'", weights.display()))?;
    let dataset = JsonLinesDataset::open(&config.val_set)?;
    let loader = PrefetchLoader::spawn(
        dataset.into_samples(),
        config.batch_size,
        config.input_size,
        config.prefetch,
    );

    let mut sink: Box<dyn MetricsSink> = match &logging_dir {
        Some(dir) => Box::new(EventSink::new(dir)?),
        None => Box::new(NullSink),
    };

    let seg_channels = config.seg_channels();
    let mut evaluator = Evaluator::new(config.eval, config.obj_list, seg_channels)?;
    let outcome = evaluator.run(
        &mut model,
        loader,
        EvalMode::Standalone,
        BestState::default(),
        sink.as_mut(),
        &mut MemoryCheckpointStore::default(),
    )?;

    println!("{}", outcome.report);
    if let Some(confusion) = &outcome.report.confusion {
        let (tp, fp) = confusion.tp_fp();
        println!("tp: {:?}", tp);
        println!("fp: {:?}", fp);
    }

    Ok(())
}
