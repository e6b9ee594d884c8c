// Entrypoint for the uploader.
// - Keeps `main` small: resolve the configuration, set up logging, then
//   hand the platform client and the file inventory to `upload::execute`.
// - Returns `anyhow::Result` so any fatal error ends the process with a
//   non-zero exit code; failed files alone do not.

use anyhow::Context;
use clap::Parser;

use upload_to_platform::api::client::PlatformClient;
use upload_to_platform::cli::Cli;
use upload_to_platform::config::{ConfigFile, RunConfiguration};
use upload_to_platform::logging;
use upload_to_platform::retry::SystemClock;
use upload_to_platform::ui::{self, Chooser, InteractiveChooser, NonInteractiveChooser};
use upload_to_platform::upload::{self, FileInventory};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let cwd = std::env::current_dir().context("cannot determine the working directory")?;
    let config_path = ConfigFile::discover(cli.config.as_deref(), &cwd)?;
    let file = match &config_path {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let config = RunConfiguration::resolve(file, cli.into_overrides(), &cwd)?;

    // Held until the end of main so the log file is flushed.
    let _log_guard = logging::init(&config.log_folder, verbose)?;
    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "configuration read"),
        None => tracing::info!("no configuration file found, using command line and defaults"),
    }

    let inventory = FileInventory::for_run(&config)?;
    let api = PlatformClient::from_config(&config)?;
    let chooser: Box<dyn Chooser> = if config.interactive {
        Box::new(InteractiveChooser)
    } else {
        Box::new(NonInteractiveChooser)
    };
    let progress = if inventory.is_empty() {
        indicatif::ProgressBar::hidden()
    } else {
        ui::upload_progress(inventory.len() as u64)
    };

    let report = upload::execute(&api, chooser.as_ref(), &SystemClock, &config, inventory, progress)
        .context("upload run aborted")?;

    tracing::info!(
        archived = report.archived.len(),
        failed = report.failed.len(),
        archive_failures = report.archive_failures.len(),
        urba_failures = report.urba_failures.len(),
        "run finished"
    );
    ui::print_report(&report);
    Ok(())
}
