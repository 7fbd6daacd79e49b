use std::process::ExitCode;

use shrike_inspector::cli::CliOverrides;
use shrike_inspector::run_with_overrides;

fn main() -> ExitCode {
    let overrides = match CliOverrides::parse_from_env() {
        Ok(cli) => cli.into_config_overrides(),
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };
    match pollster::block_on(run_with_overrides(overrides)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Fatal: {err:?}");
            ExitCode::FAILURE
        }
    }
}
