use clap::Parser;
use clap::Subcommand;
use napg_cli::cmd::build::BuildArgs;
use napg_cli::cmd::check::CheckArgs;
use napg_cli::cmd::eval::EvalArgs;
use napg_cli::cmd::query::QueryArgs;
use std::process::ExitCode;

#[derive(Subcommand)]
enum Commands {
  /// Build an index from a packed f32 matrix.
  Build(BuildArgs),
  /// Measure recall of an index against exact search.
  Eval(EvalArgs),
  /// Print the nearest neighbors of query vectors.
  Query(QueryArgs),
  /// Verify the link structure of an index.
  Check(CheckArgs),
}

#[derive(Parser)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  let cli = Cli::parse();
  let res = match cli.command {
    Commands::Build(args) => args.exec(),
    Commands::Eval(args) => args.exec(),
    Commands::Query(args) => args.exec(),
    Commands::Check(args) => args.exec(),
  };
  match res {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      tracing::error!(%err, "command failed");
      ExitCode::FAILURE
    }
  }
}
