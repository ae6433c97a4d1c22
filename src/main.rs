use std::{
    fs::{create_dir_all, File},
    path::{Path, PathBuf},
};

use clap::Parser;
use epi_schools::{
    disease_model,
    parameters::ContextParametersExt,
    population_loader, reports,
    schools::{self, ContextSchoolsExt},
};
use ixa::{
    info, report::ContextReportExt, set_log_level, Context, ContextGlobalPropertiesExt,
    ContextRandomExt, IxaError, LevelFilter,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// path to the input file
    #[arg(short, long)]
    input_file: PathBuf,

    /// path to the output directory
    #[arg(short, long)]
    output_directory: PathBuf,

    /// one of off, error, warn, info, debug or trace
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

const SCHOOL_STATS_FILE: &str = "school_stats.json";

fn initialize(args: &Args) -> Result<Context, IxaError> {
    let mut context = Context::new();
    // read the global properties.
    context.load_global_properties(&args.input_file)?;
    let seed = context.get_params().seed;
    context.init_random(seed);

    create_dir_all(&args.output_directory)?;
    context
        .report_options()
        .directory(args.output_directory.clone())
        .overwrite(true);

    population_loader::init(&mut context)?;
    schools::init(&mut context)?;
    reports::init(&mut context)?;
    disease_model::init(&mut context)?;

    info!(
        "Initialized a {} day run with seed {seed}",
        context.get_params().n_days
    );
    Ok(context)
}

fn write_school_stats(context: &Context, output_directory: &Path) -> Result<(), IxaError> {
    let Some(report) = context.get_school_report() else {
        return Ok(());
    };
    let file = File::create(output_directory.join(SCHOOL_STATS_FILE))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    let level: LevelFilter = args.log_level.parse().expect("Invalid log level.");
    set_log_level(level);

    let mut context = initialize(&args).expect("Error initializing.");
    context.execute();
    write_school_stats(&context, &args.output_directory)
        .expect("Error writing school statistics.");
}
