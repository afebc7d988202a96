//! Package command - build or reuse the kernel package for a source tree

use crate::cli::PackageArgs;
use crate::config::Config;
use crate::error::KcacheResult;
use crate::packager::PackagingOrchestrator;
use crate::source::SourceLocation;
use crate::target::create_executor;
use crate::ui::{TaskSpinner, UiContext};
use tracing::debug;

/// Execute the package command
pub async fn execute(args: PackageArgs, config: &Config) -> KcacheResult<()> {
    let config = apply_overrides(&args, config);
    let ctx = UiContext::detect();

    let executor = create_executor(&config.target)?;
    debug!("Using build machine: {}", executor.name());

    let location = SourceLocation::from_config(&config.source);
    let orchestrator = PackagingOrchestrator::from_config(executor.clone(), &config);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!(
        "Packaging kernel from {} on {}...",
        location.code_path(),
        executor.name()
    ));

    match orchestrator.request(&location, !args.no_cache).await {
        Ok(path) => {
            spinner.stop("Kernel package ready");
            // Path on stdout so scripts can capture it
            println!("{}", path);
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Packaging failed");
            Err(e)
        }
    }
}

/// Command-line flags take precedence over the config file
fn apply_overrides(args: &PackageArgs, config: &Config) -> Config {
    let mut config = config.clone();
    if let Some(repo) = &args.repo {
        config.source.repo = Some(repo.clone());
    }
    if let Some(git_ref) = &args.git_ref {
        config.source.git_ref = Some(git_ref.clone());
    }
    if let Some(work_dir) = &args.work_dir {
        config.source.work_dir = work_dir.clone();
    }
    if let Some(branch) = &args.expect_branch {
        config.build.expected_branch = Some(branch.clone());
    }
    if let Some(kernel_config) = &args.kernel_config {
        config.build.kernel_config_file = Some(kernel_config.clone());
    }
    config
}
