use std::io;
use std::process::{Command, Stdio};

/// Where a subprocess's stdout and stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRouting {
    /// Dropped.
    Discard,
    /// Forwarded to our stderr (verbose mode).
    Diagnostic,
}

impl OutputRouting {
    pub fn for_verbosity(verbose: bool) -> Self {
        if verbose {
            OutputRouting::Diagnostic
        } else {
            OutputRouting::Discard
        }
    }

    fn stdio(self) -> Stdio {
        match self {
            OutputRouting::Discard => Stdio::null(),
            OutputRouting::Diagnostic => Stdio::from(io::stderr()),
        }
    }
}

/// Seam between the scanner invoker and the operating system.
///
/// Tests substitute a fake so no real scanner binary is needed.
pub trait ProcessRunner {
    /// Runs `program` to completion. Returns `Ok(true)` on a zero exit status.
    fn run(&self, program: &str, args: &[String], routing: OutputRouting) -> io::Result<bool>;

    /// Runs `program` and returns stdout followed by stderr.
    fn combined_output(&self, program: &str, args: &[String]) -> io::Result<Vec<u8>>;
}

/// Runs real subprocesses through [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], routing: OutputRouting) -> io::Result<bool> {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(routing.stdio())
            .stderr(routing.stdio())
            .status()?;
        Ok(status.success())
    }

    fn combined_output(&self, program: &str, args: &[String]) -> io::Result<Vec<u8>> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(combined)
    }
}
