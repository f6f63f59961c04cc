use badge_host::{BadgeOptions, HostSettings, resolve_configuration};
use env_logger::Env;
use log::{debug, error, warn};
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut arguments = env::args_os()
        .skip(1)
        .map(|argument| argument.to_string_lossy().into_owned());
    let configuration = resolve_configuration(arguments.next());
    let ignored: Vec<String> = arguments.collect();

    let (options, warnings) = BadgeOptions::from_configuration(&configuration);
    let default_filter = if options.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    for warning in &warnings {
        warn!("configuration: {warning}");
    }
    if !ignored.is_empty() {
        debug!("ignoring extra arguments: {ignored:?}");
    }
    debug!("configuration: {configuration}");

    let settings = HostSettings::from_env();
    match badge_host::run(&settings, &configuration) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!("{failure}");
            ExitCode::FAILURE
        }
    }
}
