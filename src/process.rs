//! External process execution and transcript classification.
//!
//! The solver and observer run synchronously in the working directory. Their
//! combined stdout/stderr is echoed as it arrives, collected into a
//! `ProcessResult`, and checked against a list of failure predicates.
use crate::error::PipelineError;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

impl ProcessRequest {
    pub fn new(program: &str, args: Vec<String>, workdir: &Path) -> Self {
        Self {
            program: program.to_string(),
            args,
            workdir: workdir.to_path_buf(),
        }
    }

    pub fn command_line(&self) -> String {
        let mut words = vec![self.program.clone()];
        words.extend(self.args.iter().cloned());
        shell_words::join(words)
    }
}

/// Exit status plus the full combined transcript of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub program: String,
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub transcript: String,
    pub interrupted: bool,
}

impl ProcessResult {
    #[cfg(test)]
    pub fn success(program: &str, transcript: &str) -> Self {
        Self {
            program: program.to_string(),
            status: Some(0),
            transcript: transcript.to_string(),
            interrupted: false,
        }
    }
}

pub trait ProcessRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessResult>;
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Records SIGINT while installed; restores the default disposition on drop.
struct InterruptGuard;

impl InterruptGuard {
    fn install() -> Self {
        INTERRUPTED.store(false, Ordering::SeqCst);
        let handler = on_sigint as extern "C" fn(libc::c_int);
        // SAFETY: the handler only stores to an atomic.
        unsafe {
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        }
        Self
    }

    fn triggered(&self) -> bool {
        INTERRUPTED.load(Ordering::SeqCst)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        // SAFETY: restores the default disposition.
        unsafe {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
        }
    }
}

/// Runs programs found on `PATH`, blocking until they exit.
#[derive(Debug, Default)]
pub struct SystemRunner {
    /// Echo transcript lines to stdout while the process runs.
    pub echo: bool,
}

impl ProcessRunner for SystemRunner {
    fn run(&self, request: &ProcessRequest) -> Result<ProcessResult> {
        let binary = which::which(&request.program).map_err(|err| PipelineError::ExternalProcess {
            program: request.program.clone(),
            line: format!("executable not found: {err}"),
        })?;
        tracing::info!(command = %request.command_line(), "executing");
        let start = Instant::now();
        let guard = InterruptGuard::install();
        let mut child = Command::new(&binary)
            .args(&request.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", binary.display()))?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow!("capture stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("capture stderr"))?;
        let (tx, rx) = mpsc::channel();
        let out_tx = tx.clone();
        let out_reader = thread::spawn(move || forward_lines(stdout, &out_tx));
        let err_reader = thread::spawn(move || forward_lines(stderr, &tx));
        let mut lines = Vec::new();
        for line in rx {
            if self.echo {
                println!("{line}");
            }
            lines.push(line);
        }
        for (name, reader) in [("stdout", out_reader), ("stderr", err_reader)] {
            reader
                .join()
                .map_err(|_| anyhow!("{name} reader panicked"))?
                .with_context(|| format!("read {name} of {}", request.program))?;
        }

        let status = child
            .wait()
            .with_context(|| format!("wait for {}", request.program))?;
        let interrupted = guard.triggered();
        drop(guard);

        let mut transcript = lines.join("\n");
        if !transcript.is_empty() {
            transcript.push('\n');
        }
        tracing::info!(
            program = %request.program,
            status = ?status.code(),
            interrupted,
            transcript_bytes = transcript.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "process finished"
        );
        Ok(ProcessResult {
            program: request.program.clone(),
            status: status.code(),
            transcript,
            interrupted,
        })
    }
}

/// Send each line of `stream` in arrival order. Bytes that are not UTF-8
/// are replaced rather than ending the read.
fn forward_lines(stream: impl Read, tx: &Sender<String>) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        if tx.send(line.trim_end_matches(['\n', '\r']).to_string()).is_err() {
            return Ok(());
        }
    }
}

/// A condition on a process result that marks the call as failed.
#[derive(Debug, Clone)]
pub enum FailurePredicate {
    /// Any transcript line matching the pattern.
    LinePattern(Regex),
    /// A non-zero exit status.
    NonZeroExit,
}

impl FailurePredicate {
    pub fn keyword(word: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("(?i){}", regex::escape(word)))
            .with_context(|| format!("compile failure keyword {word:?}"))?;
        Ok(FailurePredicate::LinePattern(pattern))
    }

    /// The offending line when the predicate matches.
    pub fn check(&self, result: &ProcessResult) -> Option<String> {
        match self {
            FailurePredicate::LinePattern(pattern) => result
                .transcript
                .lines()
                .find(|line| pattern.is_match(line))
                .map(|line| line.trim().to_string()),
            FailurePredicate::NonZeroExit => match result.status {
                Some(0) => None,
                Some(code) => Some(format!("exited with status {code}")),
                None => Some("terminated by signal".to_string()),
            },
        }
    }
}

/// Case-insensitive "error" and "stop" lines, then the exit status.
pub fn default_predicates() -> Result<Vec<FailurePredicate>> {
    Ok(vec![
        FailurePredicate::keyword("error")?,
        FailurePredicate::keyword("stop")?,
        FailurePredicate::NonZeroExit,
    ])
}

/// Fail on interruption or on the first matching predicate.
pub fn classify(result: &ProcessResult, predicates: &[FailurePredicate]) -> Result<()> {
    if result.interrupted {
        return Err(PipelineError::Interrupted {
            program: result.program.clone(),
        }
        .into());
    }
    for predicate in predicates {
        if let Some(line) = predicate.check(result) {
            tracing::error!(program = %result.program, line = %line, "external process failed");
            return Err(PipelineError::ExternalProcess {
                program: result.program.clone(),
                line,
            }
            .into());
        }
    }
    Ok(())
}

/// Append a transcript to the persistent log shared by all stages.
pub fn append_log(path: &Path, result: &ProcessResult) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(result.transcript.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
