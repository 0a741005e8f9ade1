use crate::env::EnvSnapshot;
use std::{
    env,
    ffi::OsString,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn command: {0}")]
    Spawn(io::Error),
    #[error("Failed to wait for a child process: {0}")]
    Wait(io::Error),
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

/// Output of a finished external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs shell command lines used to introspect launchers and the batch system.
///
/// Only `run` has to be provided, `output` and `outputs` implement the soft failure
/// semantics every prober relies on: any failure is logged and yields an empty string.
pub trait CommandRunner {
    /// run `command` through the shell, merging stderr into stdout if requested
    fn run(&self, command: &str, merge_stderr: bool) -> Result<CommandOutput, CommandError>;

    /// standard output of `command`, empty on a non-zero exit or any other failure
    fn output(&self, command: &str) -> String {
        match self.run(command, false) {
            Ok(output) if output.success => output.stdout,
            Ok(output) => {
                error!(command, stderr = %output.stderr.trim_end(), "Command failed");
                String::new()
            }
            Err(e) => {
                error!(command, "{e}");
                String::new()
            }
        }
    }

    /// merged standard and error output of `command`, regardless of the exit status
    fn outputs(&self, command: &str) -> String {
        match self.run(command, true) {
            Ok(output) => output.stdout,
            Err(e) => {
                warn!(command, "{e}");
                String::new()
            }
        }
    }
}

/// Runs commands through the user's shell with a timeout
#[derive(Debug, Clone)]
pub struct SystemRunner {
    shell: PathBuf,
    timeout: Duration,
    envs: Vec<(String, String)>,
    path_prefix: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new(shell: PathBuf, timeout: Duration) -> Self {
        Self {
            shell,
            timeout,
            envs: Vec::new(),
            path_prefix: None,
        }
    }

    /// Pass the variables of `env` to every command, e.g., after sourcing a rcfile
    pub fn with_environment(mut self, env: &EnvSnapshot) -> Self {
        self.envs = env
            .vars()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        self
    }

    /// directory put in front of `PATH` for commands started by `status`
    pub fn with_path_prefix(mut self, prefix: Option<PathBuf>) -> Self {
        self.path_prefix = prefix.filter(|prefix| !prefix.as_os_str().is_empty());
        self
    }

    /// Run `command` attached to the current terminal, without timeout.
    ///
    /// Returns the exit code, `-1` if the command was terminated by a signal.
    /// With `echo` set the command line is printed first.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn status(&self, command_line: &str, echo: bool) -> Result<i32, CommandError> {
        if echo {
            println!("{command_line}");
        }

        let mut command = self.command(command_line);

        if let Some(prefix) = &self.path_prefix {
            let inherited = self
                .envs
                .iter()
                .find(|(name, _)| name == "PATH")
                .map(|(_, value)| OsString::from(value))
                .or_else(|| env::var_os("PATH"));

            match prefixed_path(prefix, inherited) {
                Some(path) => {
                    command.env("PATH", path);
                }
                None => warn!(prefix = ?prefix, "Unable to prepend to PATH, running with the inherited PATH"),
            }
        }

        let status = command.status().map_err(CommandError::Spawn)?;
        debug!(status = ?status, "Finished {command_line}");

        Ok(status.code().unwrap_or(-1))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, command_line: &str) -> Command {
        let mut command = Command::new(&self.shell);

        if cfg!(windows) {
            command.arg("/C");
        } else {
            command.arg("-c");
        }
        command.arg(command_line);
        command.envs(self.envs.iter().map(|(name, value)| (name, value)));

        command
    }
}

/// `prefix` followed by the entries of `path`, `None` if `prefix` can't be joined
fn prefixed_path(prefix: &Path, path: Option<OsString>) -> Option<OsString> {
    let entries = path
        .map(|path| env::split_paths(&path).collect::<Vec<_>>())
        .unwrap_or_default();

    env::join_paths(std::iter::once(prefix.to_path_buf()).chain(entries)).ok()
}

/// Join arguments into a shell command line, arguments with blanks are quoted
pub fn command_line<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(AsRef::as_ref)
        .map(|arg| {
            if arg.contains(' ') {
                format!("\"{arg}\"")
            } else {
                arg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl CommandRunner for SystemRunner {
    #[tracing::instrument(level = "debug", skip(self))]
    fn run(&self, command: &str, merge_stderr: bool) -> Result<CommandOutput, CommandError> {
        let command_line = if merge_stderr && cfg!(windows) {
            format!("{command} 2>&1")
        } else if merge_stderr {
            format!("( {command} ) 2>&1")
        } else {
            command.to_string()
        };

        let mut child = self
            .command(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CommandError::Spawn)?;

        // drain the pipes while waiting, launcher help texts can exceed the pipe buffer
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                kill(&mut child);
                return Err(CommandError::Timeout(self.timeout));
            }
            Err(e) => {
                kill(&mut child);
                return Err(CommandError::Wait(e));
            }
        };

        let output = CommandOutput {
            success: status.success(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        debug!(status = ?status, "Finished {command}");

        Ok(output)
    }
}

/// Read a pipe to the end, invalid UTF-8 (e.g., Latin-1 banners) is replaced
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();

        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buffer) {
                debug!("Failed to read child output: {e}");
            }
        }

        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Failed to kill child {}: {e}", child.id());
    }
    // reap, the exit status is irrelevant at this point
    let _ = child.wait();
}

/// Find `name` in `dirs`, absolute paths are returned as they are.
/// Directories that can't be read are skipped.
pub fn find_executable<P: AsRef<Path>>(name: &str, dirs: &[P]) -> Option<PathBuf> {
    let path = Path::new(name);

    if path.is_absolute() {
        return Some(path.to_path_buf());
    }

    dirs.iter()
        .map(|dir| dir.as_ref().join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
pub(crate) mod fake {
    use super::{CommandError, CommandOutput, CommandRunner};
    use std::{cell::RefCell, collections::BTreeMap};

    /// Answers commands from canned outputs, keyed by a substring of the command line
    #[derive(Debug, Default)]
    pub struct FakeRunner {
        responses: BTreeMap<String, CommandOutput>,
        pub calls: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, pattern: &str, stdout: &str) -> Self {
            self.responses.insert(
                pattern.to_string(),
                CommandOutput {
                    success: true,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }

        pub fn fail(mut self, pattern: &str, stderr: &str) -> Self {
            self.responses.insert(
                pattern.to_string(),
                CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
            );
            self
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, command: &str, _merge: bool) -> Result<CommandOutput, CommandError> {
            self.calls.borrow_mut().push(command.to_string());

            Ok(self
                .responses
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or(CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: format!("{command}: command not found"),
                }))
        }
    }
}
