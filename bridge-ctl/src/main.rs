//! bridge-ctl - Start table-configured commands behind a stream endpoint

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands};
use commands::{command_line, list_commands, print_quoted};
use console::style;
use runner::{run_bridged, RunConfig};

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            index,
            line,
            json,
            args,
        } => run_bridged(RunConfig {
            config,
            index,
            line,
            json,
            args,
        })
        .map(|code| {
            if code != 0 {
                std::process::exit(code);
            }
        }),
        Commands::List { config } => list_commands(&config),
        Commands::Quote { program, args } => match program {
            Some(program) => command_line(&program, &args).map(|line| println!("{}", line)),
            None => {
                print_quoted(&args);
                Ok(())
            }
        },
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn cli_parses_run_with_trailing_args() {
        let cli = Cli::try_parse_from([
            "bridge-ctl", "run", "-c", "t.json", "-i", "2", "--", "-c", "echo hi",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { index, args, .. } => {
                assert_eq!(index, 2);
                assert_eq!(args, vec!["-c", "echo hi"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn cli_rejects_line_with_json() {
        assert!(Cli::try_parse_from([
            "bridge-ctl", "run", "-c", "t.json", "-i", "1", "--line", "a", "--json", "[]",
        ])
        .is_err());
    }

    #[test]
    fn command_line_renders_program_and_args() {
        let line = command_line(Path::new("tool.exe"), &["a b".to_string()]).unwrap();
        assert_eq!(line, "\"tool.exe\" \"a b\"");
    }

    #[test]
    fn list_reports_missing_file() {
        assert!(list_commands(Path::new("/nonexistent/commands.json")).is_err());
    }
}
