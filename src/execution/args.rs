//! Argument assembly for external commands

use crate::errors::{BridgeError, Result};
use serde_json::Value;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// Caller-supplied arguments, either pre-split or as one line
#[derive(Debug, Clone, PartialEq)]
pub enum Arguments {
    /// Host values; each must be a string
    List(Vec<Value>),
    /// A single string split on spaces
    Line(String),
}

impl Arguments {
    /// Convert a host value into arguments
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(line) => Ok(Arguments::Line(line)),
            Value::Array(items) => Ok(Arguments::List(items)),
            _ => Err(BridgeError::BadArgumentType),
        }
    }

    /// Representation used in spawn log lines
    pub fn describe(&self) -> &str {
        match self {
            Arguments::List(_) => "<ARRAY>",
            Arguments::Line(line) => line,
        }
    }
}

impl From<&str> for Arguments {
    fn from(line: &str) -> Self {
        Arguments::Line(line.to_string())
    }
}

impl<S: Into<String>> From<Vec<S>> for Arguments {
    fn from(items: Vec<S>) -> Self {
        Arguments::List(items.into_iter().map(|s| Value::String(s.into())).collect())
    }
}

/// A validated command ready to be spawned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable path, always argument zero
    pub program: PathBuf,
    /// Arguments after the program
    pub args: Vec<String>,
    /// The caller's line when arguments were given as a string
    raw_line: Option<String>,
}

impl CommandSpec {
    /// Build a command from a resolved program and caller arguments.
    ///
    /// Positions in errors are 1-based, counted in the caller's list.
    pub fn assemble(program: &Path, arguments: &Arguments) -> Result<Self> {
        let (args, raw_line) = match arguments {
            Arguments::List(items) => {
                let mut args = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) => args.push(s.clone()),
                        _ => return Err(BridgeError::BadArgument { position: i + 1 }),
                    }
                }
                (args, None)
            }
            Arguments::Line(line) => (split_words(line), Some(line.clone())),
        };

        if let Some(i) = args.iter().position(|a| a.contains('\0')) {
            return Err(BridgeError::NulInArgument { position: i + 1 });
        }
        if program.to_string_lossy().contains('\0') {
            return Err(BridgeError::InvalidConfig(
                "program path contains a NUL byte".to_string(),
            ));
        }

        Ok(CommandSpec {
            program: program.to_path_buf(),
            args,
            raw_line,
        })
    }

    /// Caller's argument form for log lines
    pub fn describe_args(&self) -> &str {
        self.raw_line.as_deref().unwrap_or("<ARRAY>")
    }

    /// NUL-terminated argument vector with the program first.
    ///
    /// Argument positions in errors are 1-based, as in [`CommandSpec::assemble`].
    pub fn to_argv(&self) -> Result<Vec<CString>> {
        let program = CString::new(self.program.to_string_lossy().as_bytes()).map_err(|_| {
            BridgeError::InvalidConfig("program path contains a NUL byte".to_string())
        })?;
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(program);
        for (i, arg) in self.args.iter().enumerate() {
            let arg = CString::new(arg.as_str())
                .map_err(|_| BridgeError::NulInArgument { position: i + 1 })?;
            argv.push(arg);
        }
        Ok(argv)
    }

    /// Argument portion of a Windows command line
    pub fn args_line(&self) -> String {
        match &self.raw_line {
            Some(line) => line.clone(),
            None => self
                .args
                .iter()
                .map(|a| quote_argument(a))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Full Windows command line: quoted program, a space, then the arguments
    pub fn to_command_line(&self) -> String {
        let program = self.program.to_string_lossy();
        let program = program.trim_matches(' ');
        let program = if program.starts_with('"') {
            program.to_string()
        } else {
            format!("\"{}\"", program)
        };
        format!("{} {}", program, self.args_line())
    }
}

/// Split on single spaces the way a line reader does: runs of spaces yield
/// empty words, a trailing space does not.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words: Vec<String> = line.split(' ').map(str::to_string).collect();
    if words.last().is_some_and(String::is_empty) {
        words.pop();
    }
    words
}

/// Quote one argument so the Windows command-line parser yields it back unchanged
pub fn quote_argument(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if !arg.contains([' ', '\t', '\n', '\x0b', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}
