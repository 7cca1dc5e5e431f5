use std::path::PathBuf;

fn main() {
    let config_file = match parse_args() {
        Ok(Some(config_file)) => config_file,
        Ok(None) => return,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    if let Err(err) = med_gallery::run(config_file) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Returns `Ok(None)` when a flag was handled and the program should exit.
fn parse_args() -> Result<Option<Option<PathBuf>>, String> {
    let mut config_file = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Med-Gallery {}", med_gallery::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                println!(
                    "Med-Gallery: browse and share medical images from the terminal.\n\n  --config <PATH>      Read configuration from PATH\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                return Ok(None);
            }
            "--config" => match args.next() {
                Some(path) => config_file = Some(PathBuf::from(path)),
                None => return Err("--config needs a path".to_string()),
            },
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(Some(config_file))
}
