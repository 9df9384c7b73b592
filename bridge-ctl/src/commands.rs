use console::style;
use external_bridge::execution::{quote_argument, Arguments, CommandSpec};
use external_bridge::CommandTable;
use log::info;
use std::path::Path;

pub fn list_commands(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let table = CommandTable::load(path)?;
    info!("Listing {} command table entries", table.len());

    if table.is_empty() {
        println!("No commands configured in {}", path.display());
        return Ok(());
    }

    println!("Configured commands:\n");
    for (index, entry) in table.entries() {
        match entry {
            Some(program) if !program.as_os_str().is_empty() => {
                println!("  {:>3}  {}", style(index).bold(), program.display())
            }
            _ => println!("  {:>3}  {}", style(index).bold(), style("(unset)").dim()),
        }
    }
    Ok(())
}

pub fn print_quoted(args: &[String]) {
    let quoted: Vec<String> = args.iter().map(|a| quote_argument(a)).collect();
    println!("{}", quoted.join(" "));
}

/// Windows command line for a program and list arguments
pub fn command_line(program: &Path, args: &[String]) -> Result<String, Box<dyn std::error::Error>> {
    let spec = CommandSpec::assemble(program, &Arguments::from(args.to_vec()))?;
    Ok(spec.to_command_line())
}
