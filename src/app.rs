use std::borrow::Cow;
use std::io::IsTerminal as _;
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter};
use owo_colors::{OwoColorize as _, Stream, Style};

static VERBOSITY: OnceLock<LevelFilter> = OnceLock::new();

/// Check if stdout is connected to a TTY
pub static IS_A_TTY: LazyLock<bool> = LazyLock::new(|| std::io::stdout().is_terminal());

/// The global verbosity. Falls back to `Info` when it was never set, which is the
/// case inside unit tests.
pub fn verbosity() -> LevelFilter {
    VERBOSITY.get().copied().unwrap_or(LevelFilter::Info)
}

pub fn set_global_verbosity(verbosity: LevelFilter) {
    // A second call keeps the first value.
    let _ = VERBOSITY.set(verbosity);
}

/// Whether messages at `level` are shown under `filter`.
pub fn enabled(level: Level, filter: LevelFilter) -> bool {
    level <= filter
}

/// Print `message` to stderr when `level` passes the global verbosity.
pub fn emit(level: Level, style: Style, message: &str) {
    if enabled(level, verbosity()) {
        print_styled(Stream::Stderr, style, message);
    }
}

/// Print `message` unconditionally, styled only when `stream` supports colors.
pub fn print_styled(stream: Stream, style: Style, message: &str) {
    let styled = message.if_supports_color(stream, |text| text.style(style));
    match stream {
        Stream::Stdout => println!("{styled}"),
        _ => eprintln!("{styled}"),
    }
}

/// Run `op` behind a spinner when attached to a terminal.
pub fn with_spinner<T>(message: impl Into<Cow<'static, str>>, op: impl FnOnce() -> T) -> T {
    if !*IS_A_TTY || !enabled(Level::Info, verbosity()) {
        return op();
    }

    let progress_bar = match get_progress_bar() {
        Ok(progress_bar) => progress_bar,
        Err(_) => return op(),
    };
    progress_bar.set_message(message);
    let result = op();
    progress_bar.finish_and_clear();
    result
}

fn get_progress_bar() -> Result<ProgressBar> {
    let progress_bar = ProgressBar::new_spinner();
    progress_bar.enable_steady_tick(Duration::from_millis(125));
    progress_bar.set_style(
        ProgressStyle::with_template("{spinner} {msg:.magenta.bold}")?
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["∙∙∙", "●∙∙", "∙●∙", "∙∙●", "∙∙∙"]),
    );

    Ok(progress_bar)
}
