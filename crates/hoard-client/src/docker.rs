//! Container image and model backend driven through the `docker` CLI.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use hoard_core::error::{AppError, ErrorClass};
use hoard_core::item::{FetchItem, ItemKind};
use hoard_core::traits::FetchBackend;
use tokio::process::Command;

const INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output from one `docker` invocation.
#[derive(Debug, Clone)]
pub struct DockerOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    pub duration: Duration,
}

impl DockerOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A located `docker` binary.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
}

impl DockerCli {
    /// Finds `docker` on `PATH`.
    pub fn locate() -> Result<Self, AppError> {
        which::which("docker")
            .map(|program| Self { program })
            .map_err(|e| AppError::ConfigError(format!("docker CLI not found on PATH: {e}")))
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Runs `docker <args>`. The child is killed if the returned future is
    /// dropped, so an attempt timeout never leaves a pull running.
    pub async fn run(&self, args: &[&str], timeout: Option<Duration>) -> Result<DockerOutput, AppError> {
        tracing::debug!(args = ?args, "Running docker");
        let start = Instant::now();

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, command.output()).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(args = ?args, timeout_secs = timeout.as_secs(), "docker timed out");
                    return Err(AppError::Timeout(timeout.as_secs()));
                }
            },
            None => command.output().await?,
        };

        let result = DockerOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };
        tracing::debug!(
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "docker finished"
        );
        Ok(result)
    }

    /// Like [`run`](Self::run), but a non-zero exit becomes a classified error.
    pub async fn run_checked(&self, args: &[&str], timeout: Option<Duration>) -> Result<DockerOutput, AppError> {
        let output = self.run(args, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(docker_error(&output.stderr, output.exit_code))
        }
    }
}

/// Maps docker's stderr into the failure taxonomy.
///
/// Dial and TLS timeouts reported by docker count as `Network`; `Timeout`
/// is reserved for our own deadlines.
pub fn classify_docker_stderr(stderr: &str) -> ErrorClass {
    let s = stderr.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| s.contains(n));

    if any(&["toomanyrequests", "rate limit", "429 too many requests"]) {
        ErrorClass::RateLimit
    } else if any(&["no space left on device", "disk quota exceeded"]) {
        ErrorClass::DiskSpace
    } else if any(&[
        "unauthorized",
        "authentication required",
        "access denied",
        "requested access to the resource is denied",
        "permission denied",
    ]) {
        ErrorClass::Auth
    } else if any(&[
        "manifest unknown",
        "no such manifest",
        "invalid reference format",
        "repository does not exist",
        "not found",
    ]) {
        ErrorClass::Invalid
    } else if any(&[
        "connection refused",
        "connection reset",
        "no such host",
        "i/o timeout",
        "tls handshake timeout",
        "unexpected eof",
        "network is unreachable",
        "temporary failure in name resolution",
    ]) {
        ErrorClass::Network
    } else {
        ErrorClass::Unknown
    }
}

fn docker_error(stderr: &str, exit_code: i32) -> AppError {
    let message = match stderr.trim() {
        "" => format!("docker exited with code {exit_code}"),
        s => s.lines().last().unwrap_or(s).to_string(),
    };
    match classify_docker_stderr(stderr) {
        ErrorClass::RateLimit => AppError::RateLimited(message),
        ErrorClass::DiskSpace => AppError::DiskSpace(message),
        ErrorClass::Auth => AppError::AuthError(message),
        ErrorClass::Invalid => AppError::InvalidReference(message),
        ErrorClass::Network => AppError::NetworkError(message),
        ErrorClass::Timeout | ErrorClass::Unknown => AppError::Generic(message),
    }
}

/// Backend for `Image` and `Model` items.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    cli: DockerCli,
}

impl DockerBackend {
    pub fn new(cli: DockerCli) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &DockerCli {
        &self.cli
    }

    /// Local size of a pulled image, 0 if docker cannot tell.
    async fn image_size(&self, reference: &str) -> u64 {
        let args = ["image", "inspect", "--format", "{{.Size}}", reference];
        match self.cli.run_checked(&args, Some(INSPECT_TIMEOUT)).await {
            Ok(output) => output.stdout.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(reference, output = %output.stdout.trim(), "Unparseable image size");
                0
            }),
            Err(e) => {
                tracing::warn!(reference, error = %e, "Could not inspect pulled image");
                0
            }
        }
    }
}

impl FetchBackend for DockerBackend {
    async fn probe(&self, item: &FetchItem) -> Result<(), AppError> {
        let args = ["manifest", "inspect", item.source_ref.as_str()];
        self.cli.run_checked(&args, None).await.map(|_| ())
    }

    async fn fetch(&self, item: &FetchItem) -> Result<u64, AppError> {
        let reference = item.source_ref.as_str();
        match item.kind {
            ItemKind::Image => {
                self.cli.run_checked(&["pull", "--quiet", reference], None).await?;
                Ok(self.image_size(reference).await)
            }
            ItemKind::Model => {
                self.cli.run_checked(&["model", "pull", reference], None).await?;
                Ok(item.estimated_size_bytes.unwrap_or(0))
            }
            ItemKind::File => Err(AppError::ConfigError(format!(
                "docker backend cannot fetch file item '{}'",
                item.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let stderr = "Error response from daemon: toomanyrequests: You have reached your pull rate limit.";
        assert_eq!(classify_docker_stderr(stderr), ErrorClass::RateLimit);
    }

    #[test]
    fn test_classify_invalid_and_auth() {
        assert_eq!(
            classify_docker_stderr("Error response from daemon: manifest for postgres:99 not found: manifest unknown"),
            ErrorClass::Invalid
        );
        assert_eq!(
            classify_docker_stderr("invalid reference format: repository name must be lowercase"),
            ErrorClass::Invalid
        );
        assert_eq!(
            classify_docker_stderr("pull access denied for acme/private, repository does not exist or may require 'docker login': denied: requested access to the resource is denied"),
            ErrorClass::Auth
        );
    }

    #[test]
    fn test_classify_network_disk_unknown() {
        assert_eq!(
            classify_docker_stderr("dial tcp: lookup registry-1.docker.io: no such host"),
            ErrorClass::Network
        );
        assert_eq!(
            classify_docker_stderr("net/http: TLS handshake timeout"),
            ErrorClass::Network
        );
        assert_eq!(
            classify_docker_stderr("write /var/lib/docker/tmp/x: no space left on device"),
            ErrorClass::DiskSpace
        );
        assert_eq!(classify_docker_stderr("something else"), ErrorClass::Unknown);
    }

    #[test]
    fn test_docker_error_keeps_last_line() {
        let err = docker_error("Pulling fs layer\nError: toomanyrequests", 1);
        assert!(matches!(err, AppError::RateLimited(ref m) if m == "Error: toomanyrequests"));

        let err = docker_error("", 125);
        assert_eq!(err.to_string(), "docker exited with code 125");
        assert_eq!(err.class(), ErrorClass::Unknown);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_code() {
        // Any binary works for exercising the runner; `false` always exits 1.
        let Ok(program) = which::which("false") else {
            return;
        };
        let cli = DockerCli::with_program(program);

        let output = cli.run(&[], Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(output.exit_code, 1);
        assert!(cli.run_checked(&[], None).await.is_err());
    }
}
