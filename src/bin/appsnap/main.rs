use env_logger::{Builder, Env};
use log::error;

use appsnap::consts::{COMPILATION_ERROR_EXIT_CODE, GENERIC_ERROR_EXIT_CODE};
use appsnap::gen::CompilationError;

fn init_logger() {
    // Level comes from RUST_LOG, default info.
    // Example: RUST_LOG=debug appsnap inspect --path app.snapshot
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = appsnap::cli::run() {
        error!("{:?}", e);
        let code = if e.downcast_ref::<CompilationError>().is_some() {
            COMPILATION_ERROR_EXIT_CODE
        } else {
            GENERIC_ERROR_EXIT_CODE
        };
        std::process::exit(code);
    }
}
