//! External process invocation shared by every stage of the pipeline.
//!
//! All commands go through an [`Executor`] so the stages can be exercised
//! against a recording fake instead of real binaries.

use std::fmt;
use std::io::{self, Read as _};
use std::process::{Command, ExitStatus, Stdio};

use itertools::Itertools as _;
use owo_colors::{Stream, Style};
use snafu::{ResultExt as _, Snafu};

use crate::app;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("run command {command:?}: {source}"))]
    Io { command: String, source: io::Error },
    #[snafu(display("run command {command:?}: {}", describe_exit(*code)))]
    Exit { command: String, code: Option<i32> },
    #[snafu(display("run command {command:?}: {}: {output}", describe_exit(*code)))]
    Output {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

impl CommandError {
    /// The rendered command line of the failed invocation.
    pub fn command(&self) -> &str {
        match self {
            Self::Io { command, .. } | Self::Exit { command, .. } | Self::Output { command, .. } => {
                command
            }
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// A single external process execution: program, arguments and an environment
/// overlay applied on top of the inherited environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I: Into<String>>(mut self, args: impl IntoIterator<Item = I>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Program followed by its arguments, space separated.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program).chain(&self.args).join(" ")
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.envs.iter().map(|(key, value)| (key, value)));
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

pub trait Executor {
    /// Run with stdin, stdout and stderr connected to this process.
    fn stream(&self, invocation: &Invocation) -> Result<(), CommandError>;

    /// Run with stdin inherited and stdout and stderr captured together.
    /// Returns the combined output.
    fn capture(&self, invocation: &Invocation) -> Result<String, CommandError>;
}

/// Runs invocations as real child processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    /// Print the command line before it runs, regardless of verbosity, and
    /// return it. The environment overlay only shows at debug level.
    fn echo(invocation: &Invocation) -> String {
        let command_line = invocation.command_line();
        app::print_styled(Stream::Stderr, Style::new().bold(), &command_line);
        for (key, value) in &invocation.envs {
            debug!("  with {key}={value}");
        }
        command_line
    }
}

impl Executor for SystemExecutor {
    fn stream(&self, invocation: &Invocation) -> Result<(), CommandError> {
        let command_line = Self::echo(invocation);

        let status = invocation
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .context(IoSnafu {
                command: &command_line,
            })?;

        check_status(status, command_line)
    }

    fn capture(&self, invocation: &Invocation) -> Result<String, CommandError> {
        let command_line = Self::echo(invocation);

        let (output, status) = app::with_spinner(command_line.clone(), || {
            combined_output(invocation)
        })
        .context(IoSnafu {
            command: &command_line,
        })?;

        if status.success() {
            Ok(output)
        } else {
            OutputSnafu {
                command: command_line,
                code: status.code(),
                output,
            }
            .fail()
        }
    }
}

fn check_status(status: ExitStatus, command: String) -> Result<(), CommandError> {
    if status.success() {
        Ok(())
    } else {
        ExitSnafu {
            command,
            code: status.code(),
        }
        .fail()
    }
}

/// Both output streams share one pipe so the text interleaves the way a terminal would show it.
fn combined_output(invocation: &Invocation) -> io::Result<(String, ExitStatus)> {
    let (mut reader, writer) = io::pipe()?;

    let mut command = invocation.to_command();
    command
        .stdin(Stdio::inherit())
        .stdout(writer.try_clone()?)
        .stderr(writer);
    let mut child = command.spawn()?;
    // The command still holds the write ends; they must close before the read can finish.
    drop(command);

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let status = child.wait()?;

    Ok((String::from_utf8_lossy(&bytes).into_owned(), status))
}

#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;

    use super::{CommandError, Executor, Invocation};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Mode {
        Stream,
        Capture,
    }

    type Reply = Box<dyn Fn(&Invocation) -> Result<String, String>>;

    /// Records invocations and answers them from scripted rules. A rule matches
    /// when the command line starts with its prefix; the first match wins and
    /// unmatched invocations succeed with empty output.
    #[derive(Default)]
    pub struct FakeExecutor {
        rules: Vec<(String, Reply)>,
        calls: RefCell<Vec<(Mode, Invocation)>>,
    }

    impl FakeExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn on(
            mut self,
            prefix: impl Into<String>,
            reply: impl Fn(&Invocation) -> Result<String, String> + 'static,
        ) -> Self {
            self.rules.push((prefix.into(), Box::new(reply)));
            self
        }

        #[must_use]
        pub fn output(self, prefix: impl Into<String>, output: &str) -> Self {
            let output = output.to_string();
            self.on(prefix, move |_| Ok(output.clone()))
        }

        #[must_use]
        pub fn fail(self, prefix: impl Into<String>, output: &str) -> Self {
            let output = output.to_string();
            self.on(prefix, move |_| Err(output.clone()))
        }

        pub fn calls(&self) -> Vec<(Mode, Invocation)> {
            self.calls.borrow().clone()
        }

        pub fn command_lines(&self) -> Vec<String> {
            self.calls
                .borrow()
                .iter()
                .map(|(_, invocation)| invocation.command_line())
                .collect()
        }

        pub fn ran(&self, prefix: &str) -> bool {
            self.command_lines()
                .iter()
                .any(|line| line.starts_with(prefix))
        }

        fn reply(&self, mode: Mode, invocation: &Invocation) -> Result<String, String> {
            self.calls.borrow_mut().push((mode, invocation.clone()));
            let line = invocation.command_line();
            self.rules
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map_or_else(|| Ok(String::new()), |(_, reply)| reply(invocation))
        }
    }

    impl Executor for FakeExecutor {
        fn stream(&self, invocation: &Invocation) -> Result<(), CommandError> {
            self.reply(Mode::Stream, invocation)
                .map(drop)
                .map_err(|_| CommandError::Exit {
                    command: invocation.command_line(),
                    code: Some(1),
                })
        }

        fn capture(&self, invocation: &Invocation) -> Result<String, CommandError> {
            self.reply(Mode::Capture, invocation)
                .map_err(|output| CommandError::Output {
                    command: invocation.command_line(),
                    code: Some(1),
                    output,
                })
        }
    }
}
