use std::{path::PathBuf, thread::sleep, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use htc_vasp::{
    config::CampaignConfig,
    external::{CommandGenerator, OszicarEnergy},
    log::init_tracing,
    pipeline::{PipelineOutcome, StagePipeline},
    scan::{FanOutController, PoscarScaling},
};
use tracing::{error, info};

/// Walk every structure of a VASP campaign one step further, once per cycle.
///
/// Jobs are never submitted here: a step is handed to the batch layer through
/// its `__ready__` marker and picked up again once a terminal marker appears.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Campaign configuration in YAML.
    ///
    /// Relative paths inside it are resolved against its directory.
    #[clap(short = 'i')]
    input_file: PathBuf,
    /// Stop after this many cycles, run forever if omitted.
    #[clap(short = 'n', long)]
    cycles: Option<usize>,
    /// Seconds to sleep between two cycles.
    #[clap(short = 't', long, default_value_t = 600)]
    interval: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = CampaignConfig::from_file(&args.input_file)
        .with_context(|| format!("Unable to load campaign file {:?}", args.input_file))?;
    init_tracing(&config.log_level);

    let generator = CommandGenerator::new(config.generators.clone(), config.binaries.clone());
    let variants = PoscarScaling;
    let observable = OszicarEnergy::default();
    let pipeline = StagePipeline::new(
        &config.cal_folder,
        &config.fireworks,
        &generator,
        FanOutController::new(&variants, &observable),
    );
    std::fs::create_dir_all(&config.cal_folder)
        .with_context(|| format!("Unable to create calculation folder {:?}", config.cal_folder))?;

    let mut cycle = 0;
    loop {
        cycle += 1;
        run_cycle(&config, &pipeline, cycle)?;
        if args.cycles.is_some_and(|cycles| cycle >= cycles) {
            break;
        }
        sleep(Duration::from_secs(args.interval));
    }
    info!("finished");
    Ok(())
}

fn run_cycle(config: &CampaignConfig, pipeline: &StagePipeline, cycle: usize) -> Result<()> {
    let structures = config
        .structures()
        .with_context(|| format!("Unable to list structures with {}", config.structure_pattern))?;
    let mut failures = 0;
    let mut finished = 0;
    for structure in &structures {
        // one structure going wrong never stops the others
        match pipeline.run(structure) {
            Ok(PipelineOutcome::AllDone) => finished += 1,
            Ok(outcome) => info!(structure = ?structure, outcome = ?outcome, "structure visited"),
            Err(err) => {
                failures += 1;
                if let Some(marker) = err.missing_marker() {
                    error!(structure = ?structure, %marker, error = %err, "marker changed under the pipeline, structure halted for an operator");
                } else {
                    error!(structure = ?structure, error = %err, "structure skipped for this cycle");
                }
            }
        }
    }
    info!(
        cycle,
        structures = structures.len(),
        finished,
        failures,
        "cycle finished"
    );
    Ok(())
}
