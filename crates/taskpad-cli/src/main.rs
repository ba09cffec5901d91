use std::ffi::OsString;

mod cli;
mod commands;

fn main() {
    let args: Vec<OsString> = std::env::args_os().collect();
    if let Err(err) = commands::run(args) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
