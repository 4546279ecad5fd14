use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use htc_vasp::{config::CampaignConfig, markers::StepState, resolver::resolve};
use rayon::prelude::*;
use serde::Serialize;

/// Report the current step of every structure in a campaign without touching it.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Arguments {
    /// Campaign configuration in YAML.
    #[arg(short, long)]
    input: PathBuf,
    /// Print JSON instead of a plain table.
    #[arg(short, long)]
    json: bool,
}

#[derive(Serialize)]
struct StructureStatus {
    structure: String,
    step_no: usize,
    folder: String,
    state: StepState,
    finished: bool,
}

fn main() -> Result<()> {
    let args = Arguments::parse();
    let config = CampaignConfig::from_file(&args.input)
        .with_context(|| format!("Unable to load campaign file {:?}", args.input))?;
    let structures = config.structures()?;
    let report = structures
        .par_iter()
        .map(|structure| {
            let name = structure
                .file_stem()
                .with_context(|| format!("Unable to get structure name from {:?}", structure))?
                .to_string_lossy()
                .to_string();
            let current = resolve(&config.cal_folder.join(&name), &config.fireworks)
                .with_context(|| format!("Unable to read the folders of structure {}", name))?;
            Ok(StructureStatus {
                structure: name,
                step_no: current.firework.step_no,
                folder: current.firework.firework_folder_name.clone(),
                state: current.state,
                finished: current.workflow_finished(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for status in &report {
            println!(
                "{} {}/{} {} {}",
                status.structure,
                status.step_no,
                config.fireworks.len(),
                status.folder,
                if status.finished {
                    "finished".to_string()
                } else {
                    status.state.to_string()
                }
            );
        }
    }
    Ok(())
}
