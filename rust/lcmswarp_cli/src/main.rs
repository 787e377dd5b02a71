mod cli;
mod config;
mod errors;
mod processing;

use clap::Parser;
use lcmswarp::{
    BaselineSource,
    LcmsWarp,
};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::{
    Config,
    InputConfig,
    OutputConfig,
};

#[cfg(target_os = "windows")]
use mimalloc::MiMalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn load_config(args: &Cli) -> Result<Config, errors::CliError> {
    let Some(path) = &args.config else {
        return Ok(Config::default());
    };
    let conf = match std::fs::File::open(path) {
        Ok(x) => x,
        Err(e) => {
            return Err(errors::CliError::Io {
                source: e.to_string(),
                path: Some(path.to_string_lossy().to_string()),
            });
        }
    };
    serde_json::from_reader(conf).map_err(|e| errors::CliError::ParseError { msg: e.to_string() })
}

fn main() -> std::result::Result<(), errors::CliError> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        ) // This uses RUST_LOG environment variable
        .init();

    let args = Cli::parse();
    let mut config = load_config(&args)?;

    // Override config with command line arguments if provided
    match (args.baseline, args.alignee) {
        (Some(baseline), Some(alignee)) => {
            config.input = Some(InputConfig { baseline, alignee });
        }
        (Some(baseline), None) => {
            if let Some(input) = config.input.as_mut() {
                input.baseline = baseline;
            }
        }
        (None, Some(alignee)) => {
            if let Some(input) = config.input.as_mut() {
                input.alignee = alignee;
            }
        }
        (None, None) => {}
    }
    if args.mass_tags {
        config.alignment.baseline_source = BaselineSource::MassTags;
    }
    if let Some(output_dir) = args.output_dir {
        config.output = Some(OutputConfig {
            directory: output_dir,
        });
    }

    let Some(input) = config.input.clone() else {
        return Err(errors::CliError::Config {
            source: "No input provided, please provide one in either the config file or with the --baseline and --alignee flags".to_string(),
        });
    };
    let Some(output_config) = config.output.clone() else {
        return Err(errors::CliError::Config {
            source: "No output directory provided, please provide one in either the config file or with the --output-dir flag".to_string(),
        });
    };
    info!("Parsed configuration: {:#?}", config);

    std::fs::create_dir_all(&output_config.directory).map_err(|e| errors::CliError::Io {
        source: e.to_string(),
        path: Some(output_config.directory.to_string_lossy().to_string()),
    })?;

    let aligner = LcmsWarp::new(config.alignment)?;
    let baseline = processing::read_features(&input.baseline)?;
    let alignee = processing::read_features(&input.alignee)?;
    let result = processing::run_alignment(&aligner, &baseline, &alignee)?;
    processing::write_outputs(&result, &output_config)?;

    Ok(())
}
