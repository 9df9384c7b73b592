use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bridge-ctl")]
#[command(version, about = "Run table-configured commands through a stream bridge", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Echo stdin back through /bin/cat (entry 1 of the table)
    bridge-ctl run --config commands.json --index 1

    # Pass arguments as a list, a single line, or raw JSON
    bridge-ctl run -c commands.json -i 2 -- -c 'echo hi'
    bridge-ctl run -c commands.json -i 2 --line '-c date'
    bridge-ctl run -c commands.json -i 2 --json '[\"-c\", \"exit 3\"]'

    # Inspect the table and Windows quoting
    bridge-ctl list -c commands.json
    bridge-ctl quote 'a b' 'C:\\path\\'
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a command and bridge it to this terminal
    Run {
        /// Command table (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// 1-based command index
        #[arg(short, long, value_name = "N", allow_negative_numbers = true)]
        index: i64,

        /// Arguments as one space-separated line
        #[arg(long, value_name = "LINE", conflicts_with_all = ["json", "args"])]
        line: Option<String>,

        /// Arguments as a JSON string or array
        #[arg(long, value_name = "JSON", conflicts_with = "args")]
        json: Option<String>,

        /// Arguments as a list
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List the command table
    List {
        /// Command table (JSON)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Print the Windows command-line rendering of arguments
    Quote {
        /// Render a full command line for this program
        #[arg(short, long, value_name = "PROGRAM")]
        program: Option<PathBuf>,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}
