//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    if let Err(err) = roam_cli::run() {
        eprintln!("roam: {err}");
        std::process::exit(1);
    }
}
