use std::process::ExitCode;

use camino::Utf8PathBuf;

fn main() -> ExitCode {
    let config_path = std::env::args().nth(1).map(Utf8PathBuf::from);
    match orneryd::run(config_path.as_deref()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("orneryd: {error}");
            ExitCode::FAILURE
        }
    }
}
