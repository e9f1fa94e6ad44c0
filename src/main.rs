use std::process::ExitCode;

fn main() -> ExitCode {
    virtink_e2e::cli::run()
}
