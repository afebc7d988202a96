//! Install command - install kernel packages on the build machine

use crate::cli::InstallArgs;
use crate::config::Config;
use crate::error::{KcacheError, KcacheResult};
use crate::install::DebInstaller;
use crate::target::create_executor;
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the install command
pub async fn execute(args: InstallArgs, config: &Config) -> KcacheResult<()> {
    let ctx = UiContext::detect();
    let executor = create_executor(&config.target)?;
    let installer = DebInstaller::new(executor.clone());

    ui::intro(&ctx, &format!("Installing packages on {}", executor.name()));

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Installing from {}...", args.directory));
    let report = match installer.install(&args.directory, &args.files, args.reboot).await {
        Ok(report) => {
            spinner.stop("Installation finished");
            report
        }
        Err(e) => {
            spinner.stop_error("Installation failed");
            return Err(e);
        }
    };

    if report.installed.is_empty() && report.failed.is_empty() {
        ui::outro_warn(&ctx, &format!("No .deb files found in {}", args.directory));
        return Ok(());
    }

    for file in &report.installed {
        ui::step_ok(&ctx, file);
    }
    for file in &report.failed {
        ui::step_error(&ctx, file);
    }

    if !report.is_success() {
        return Err(KcacheError::InstallFailed {
            file: report.failed.join(", "),
            reason: format!(
                "{} of {} package(s) failed",
                report.failed.len(),
                report.installed.len() + report.failed.len()
            ),
        });
    }

    if args.reboot {
        ui::outro_success(&ctx, "Packages installed, reboot requested");
    } else {
        ui::outro_success(&ctx, "Packages installed");
    }
    Ok(())
}
