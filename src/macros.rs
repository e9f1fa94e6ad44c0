/// Print to stdout in bold, whatever the verbosity.
macro_rules! display {
    ($($arg:tt)*) => {
        $crate::app::print_styled(
            owo_colors::Stream::Stdout,
            owo_colors::Style::new().bold(),
            &format!($($arg)*),
        )
    };
}

/// Print a fatal message to stderr, whatever the verbosity.
macro_rules! critical {
    ($($arg:tt)*) => {
        $crate::app::print_styled(
            owo_colors::Stream::Stderr,
            owo_colors::Style::new().bright_red(),
            &format!($($arg)*),
        )
    };
}

macro_rules! define_display_macro {
    // `$d` stands in for `$` inside the generated macro.
    ($name:ident, $level:ident, $style:ident, $d:tt) => {
        #[allow(unused_macros)]
        macro_rules! $name {
            ($d($d arg:tt)*) => {
                $crate::app::emit(
                    log::Level::$level,
                    owo_colors::Style::new().$style(),
                    &format!($d($d arg)*),
                )
            };
        }
    };
}

define_display_macro!(trace, Trace, dimmed, $);
define_display_macro!(debug, Debug, dimmed, $);
define_display_macro!(info, Info, bold, $);
define_display_macro!(success, Info, bright_cyan, $);
define_display_macro!(waiting, Info, bright_magenta, $);
define_display_macro!(warning, Warn, bright_yellow, $);
define_display_macro!(error, Error, bright_red, $);
