use std::path::Path;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use nanoc::Error;

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let mut args = std::env::args();
  let prog = args.next().unwrap_or_else(|| "nanoc".into());
  let (Some(input), None) = (args.next(), args.next()) else {
    eprintln!("Usage: {prog} file");
    return ExitCode::FAILURE;
  };

  match nanoc::compile_file(Path::new(&input)) {
    Ok(_) => ExitCode::SUCCESS,
    // Parse diagnostics go to stderr; everything else reports on stdout.
    Err(e @ Error::Parse { .. }) => {
      eprintln!("{e}");
      ExitCode::FAILURE
    }
    Err(e) => {
      println!("{e}");
      ExitCode::FAILURE
    }
  }
}
