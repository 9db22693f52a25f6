//! Title → content ID resolution.
//!
//! The production resolver runs `yt-dlp` in search mode and keeps the ID of
//! the first result.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::{Result, SponsorError};

/// Default executable used by [`YtDlpResolver`].
pub const DEFAULT_RESOLVER_COMMAND: &str = "yt-dlp";

/// Default limit for one resolution.
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(20);

const WAIT_STEP: Duration = Duration::from_millis(50);

/// Resolves a free-text query to a canonical content ID.
pub trait ContentResolver {
    /// `Ok("")` when the search found nothing, `Err` when the resolver
    /// itself failed.
    fn resolve(&self, query: &str) -> Result<String>;
}

impl<T: ContentResolver + ?Sized> ContentResolver for &T {
    fn resolve(&self, query: &str) -> Result<String> {
        (**self).resolve(query)
    }
}

/// Resolver backed by the `yt-dlp` command line tool.
#[derive(Clone, Debug)]
pub struct YtDlpResolver {
    program: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self, query: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args([
                "--quiet",
                "--no-warnings",
                "--skip-download",
                "--no-playlist",
                "--print",
                "id",
            ])
            .arg(format!("ytsearch1:{}", query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    /// Waits for `child`, killing it once the timeout elapsed.
    fn wait_with_timeout(&self, child: &mut Child) -> Result<ExitStatus> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SponsorError::resolver(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )));
            }
            thread::sleep(WAIT_STEP);
        }
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVER_COMMAND, DEFAULT_RESOLVER_TIMEOUT)
    }
}

/// Reads `pipe` to its end on a helper thread, so a chatty child never
/// blocks on a full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Bytes collected by a [`drain`] thread, empty if it panicked.
fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    reader.join().unwrap_or_default()
}

/// First non-empty line of the tool output.
fn parse_id_output(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

impl ContentResolver for YtDlpResolver {
    fn resolve(&self, query: &str) -> Result<String> {
        debug!(query, program = %self.program, "Resolving content ID");

        let mut child = self.command(query).spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                SponsorError::resolver(format!("{} not found in PATH", self.program))
            }
            _ => SponsorError::resolver(format!("failed to start {}: {}", self.program, e)),
        })?;

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        // sur timeout les lecteurs se terminent seuls à la fermeture des pipes
        let status = self.wait_with_timeout(&mut child)?;
        let stdout = collect(stdout_reader);
        let stderr = collect(stderr_reader);

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            warn!(query, status = %status, "Content search failed: {}", stderr.trim());
            return Err(SponsorError::resolver(format!(
                "{} exited with {}",
                self.program, status
            )));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        match parse_id_output(&stdout) {
            Some(id) => {
                debug!(query, content_id = %id, "Content ID resolved");
                Ok(id)
            }
            None => {
                debug!(query, "Search returned no result");
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_output() {
        assert_eq!(
            parse_id_output("\n  dQw4w9WgXcQ \nother\n"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(parse_id_output(""), None);
        assert_eq!(parse_id_output("\n \n"), None);
    }

    #[test]
    fn test_command_line() {
        let resolver = YtDlpResolver::default();
        let command = resolver.command("Rick Astley Never Gonna Give You Up");
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();

        assert_eq!(command.get_program(), "yt-dlp");
        assert_eq!(
            args.last().map(String::as_str),
            Some("ytsearch1:Rick Astley Never Gonna Give You Up")
        );
        assert!(args.iter().any(|a| a == "--skip-download"));
    }

    /// Writes an executable shell script standing in for yt-dlp.
    #[cfg(unix)]
    fn fake_resolver(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_verbose_stderr_does_not_stall_resolution() {
        let dir = tempfile::tempdir().unwrap();
        // ~200 KiB sur stderr, bien plus qu'un buffer de pipe
        let program = fake_resolver(
            dir.path(),
            "i=0; while [ $i -lt 3200 ]; do \
             echo 'WARNING: padding padding padding padding padding padding' >&2; \
             i=$((i + 1)); done\necho dQw4w9WgXcQ",
        );

        let resolver = YtDlpResolver::new(program, Duration::from_secs(10));
        assert_eq!(resolver.resolve("Rick Astley").unwrap(), "dQw4w9WgXcQ");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_reports_its_status() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_resolver(dir.path(), "echo 'ERROR: boom' >&2\nexit 3");

        let resolver = YtDlpResolver::new(program, Duration::from_secs(10));
        let err = resolver.resolve("anything").unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_program_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_resolver(dir.path(), "exec sleep 30");

        let resolver = YtDlpResolver::new(program, Duration::from_millis(300));
        let started = Instant::now();
        let err = resolver.resolve("anything").unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let resolver = YtDlpResolver::new(
            "pmosponsor-no-such-resolver-binary",
            Duration::from_secs(1),
        );
        assert!(matches!(
            resolver.resolve("anything"),
            Err(SponsorError::ResolverError(_))
        ));
    }
}
