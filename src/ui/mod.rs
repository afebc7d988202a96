//! Terminal output
//!
//! Uses `cliclack` log lines and spinners in interactive terminals, with
//! automatic fallback to plain `[OK]`/`[WARN]`/`[FAIL]` lines in CI and when
//! output is redirected.

mod context;
mod output;
mod progress;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, outro_success, outro_warn, step_error, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn_hint,
};
pub use progress::TaskSpinner;
pub use theme::{init_theme, KcacheTheme};
