//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::{style, StyledObject};

/// Outcome shown in front of a step line
#[derive(Debug, Clone, Copy)]
enum Mark {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Mark {
    /// Tag used in plain (non-interactive) output
    fn tag(self) -> StyledObject<&'static str> {
        match self {
            Mark::Ok => style("[OK]").green(),
            Mark::Warn => style("[WARN]").yellow(),
            Mark::Fail => style("[FAIL]").red(),
            Mark::Info => style("[INFO]").cyan(),
        }
    }

    fn log(self, line: String) {
        let _ = match self {
            Mark::Ok => cliclack::log::success(line),
            Mark::Warn => cliclack::log::warning(line),
            Mark::Fail => cliclack::log::error(line),
            Mark::Info => cliclack::log::info(line),
        };
    }
}

fn step(ctx: &UiContext, mark: Mark, fancy: String, plain: String) {
    if ctx.use_fancy_output() {
        mark.log(fancy);
    } else {
        println!("  {} {}", mark.tag(), plain);
    }
}

fn outro(ctx: &UiContext, mark: Mark, message: &str) {
    if ctx.use_fancy_output() {
        let styled = match mark {
            Mark::Ok => style(message).green().bold(),
            Mark::Fail => style(message).red().bold(),
            Mark::Warn | Mark::Info => style(message).yellow().bold(),
        };
        cliclack::outro(styled).ok();
    } else {
        println!();
        println!("{} {}", mark.tag(), message);
    }
}

/// Display intro banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        cliclack::intro(style(title).cyan().bold()).ok();
    } else {
        println!("{}", style(title).cyan().bold());
        println!();
    }
}

pub fn outro_success(ctx: &UiContext, message: &str) {
    outro(ctx, Mark::Ok, message);
}

pub fn outro_warn(ctx: &UiContext, message: &str) {
    outro(ctx, Mark::Warn, message);
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    step(ctx, Mark::Ok, message.to_string(), message.to_string());
}

/// Success line with a dimmed detail, e.g. the package path
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(
        ctx,
        Mark::Ok,
        format!("{} ({})", message, style(detail).dim()),
        format!("{} ({})", message, detail),
    );
}

/// Warning line with a hint on how to resolve it
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    step(
        ctx,
        Mark::Warn,
        format!("{} - {}", message, style(hint).dim()),
        format!("{} - {}", message, hint),
    );
}

pub fn step_error(ctx: &UiContext, message: &str) {
    step(ctx, Mark::Fail, message.to_string(), message.to_string());
}

pub fn step_error_detail(ctx: &UiContext, message: &str, detail: &str) {
    step(
        ctx,
        Mark::Fail,
        format!("{}: {}", message, style(detail).red()),
        format!("{}: {}", message, detail),
    );
}

pub fn step_info(ctx: &UiContext, message: &str) {
    step(ctx, Mark::Info, message.to_string(), message.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        intro(&ctx, "Installing packages on builder-01");
        step_ok(&ctx, "linux-image-6.1.0_amd64.deb");
        step_ok_detail(&ctx, "c1 (6.1.0)", "/cache/packages/commit_id-c1/linux-image.deb");
        step_warn_hint(&ctx, "Config exists", "Use --force");
        step_error(&ctx, "linux-headers-6.1.0_amd64.deb");
        step_error_detail(&ctx, "c2 (6.1.0)", "packages missing on disk");
        step_info(&ctx, "No cache entries");
        outro_warn(&ctx, "1 of 2 entries are stale");
        outro_success(&ctx, "Packages installed");
    }

    #[test]
    fn plain_tags() {
        assert_eq!(Mark::Ok.tag().force_styling(false).to_string(), "[OK]");
        assert_eq!(Mark::Fail.tag().force_styling(false).to_string(), "[FAIL]");
    }
}
