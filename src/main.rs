use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    array_import::cli::run()
}
