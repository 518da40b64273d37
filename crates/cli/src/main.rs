use std::process::ExitCode;

fn main() -> ExitCode {
    supportline_cli::run()
}
