//! Runs `git` against a working directory.
//!
//! Output on stdout is returned to the caller. Git writes progress and
//! warnings to stderr as well as errors, so only the first `fatal:` line is
//! surfaced in the returned error; everything else goes to the log.

use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Variables that would redirect git away from the directory we point it at.
const GIT_ENV_OVERRIDES: [&str; 4] = [
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
];

/// A failed git invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandError {
    /// The first `fatal:` diagnostic, or the exit status when there was none.
    pub message: String,
    /// Everything git wrote to stderr.
    pub stderr: String,
}

impl CommandError {
    fn spawn(err: std::io::Error) -> Self {
        Self {
            message: format!("running git: {err}"),
            stderr: String::new(),
        }
    }

    /// Git reports this when fetching a ref the remote does not have, e.g.
    /// the notes ref of a repo nobody has annotated yet.
    pub fn is_missing_remote_ref(&self) -> bool {
        self.message
            .to_ascii_lowercase()
            .contains("couldn't find remote ref")
    }
}

/// How commands that talk to a remote authenticate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transport<'a> {
    /// Private key handed to ssh.
    pub key: Option<&'a Path>,
    /// When false, ssh accepts any host key. This keeps first contact with
    /// a new git host from hanging on a prompt.
    pub verify_host_keys: bool,
}

impl Transport<'_> {
    /// No credentials; used for local-only commands and local clones.
    pub const LOCAL: Transport<'static> = Transport {
        key: None,
        verify_host_keys: false,
    };

    fn env(&self) -> Vec<(&'static str, String)> {
        let Some(key) = self.key else {
            return Vec::new();
        };
        let mut ssh = String::from("ssh");
        if !self.verify_host_keys {
            ssh.push_str(" -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no");
        }
        ssh.push_str(&format!(" -i \"{}\"", key.display()));
        vec![
            ("GIT_SSH_COMMAND", ssh),
            ("GIT_TERMINAL_PROMPT", "0".to_string()),
        ]
    }
}

/// Run `git <args>` in `dir` and return its stdout.
pub fn run(dir: &Path, transport: Transport<'_>, args: &[&str]) -> Result<String, CommandError> {
    let mut cmd = Command::new("git");
    for key in GIT_ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd.args(args).current_dir(dir).envs(transport.env());

    let output = cmd.output().map_err(CommandError::spawn)?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        if !stderr.trim().is_empty() {
            debug!(?args, stderr = %stderr.trim(), "git diagnostics");
        }
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    debug!(?args, status = %output.status, stderr = %stderr.trim(), "git command failed");
    let message = find_fatal_message(&stderr)
        .map(str::to_string)
        .unwrap_or_else(|| format!("git {} exited with {}", args.join(" "), output.status));
    Err(CommandError { message, stderr })
}

fn find_fatal_message(stderr: &str) -> Option<&str> {
    stderr.lines().find(|line| line.starts_with("fatal:"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_fatal_message_picks_first_fatal_line() {
        let stderr = "warning: something odd\nfatal: first\nfatal: second\n";
        assert_eq!(find_fatal_message(stderr), Some("fatal: first"));
        assert_eq!(find_fatal_message("error: nope\n"), None);
    }

    #[test]
    fn test_transport_env_without_key_is_empty() {
        assert!(Transport::LOCAL.env().is_empty());
    }

    #[test]
    fn test_transport_env_with_key() {
        let key = Path::new("/keys/id_rsa");
        let env = Transport {
            key: Some(key),
            verify_host_keys: false,
        }
        .env();

        assert_eq!(
            env[0],
            (
                "GIT_SSH_COMMAND",
                "ssh -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no -i \"/keys/id_rsa\""
                    .to_string()
            )
        );
        assert_eq!(env[1], ("GIT_TERMINAL_PROMPT", "0".to_string()));
    }

    #[test]
    fn test_transport_env_verifying_host_keys() {
        let key = Path::new("/keys/id_rsa");
        let env = Transport {
            key: Some(key),
            verify_host_keys: true,
        }
        .env();

        assert_eq!(env[0].1, "ssh -i \"/keys/id_rsa\"");
    }

    #[test]
    fn test_run_surfaces_fatal_line() {
        let dir = TempDir::new().unwrap();
        let err = run(dir.path(), Transport::LOCAL, &["rev-parse", "HEAD"]).unwrap_err();

        assert!(err.message.starts_with("fatal:"), "got {:?}", err.message);
        assert!(!err.stderr.is_empty());
    }

    #[test]
    fn test_run_returns_stdout() {
        let dir = TempDir::new().unwrap();
        let out = run(dir.path(), Transport::LOCAL, &["--version"]).unwrap();
        assert!(out.starts_with("git version"));
    }

    #[test]
    fn test_missing_remote_ref_detection() {
        let err = CommandError {
            message: "fatal: couldn't find remote ref refs/notes/tideway".to_string(),
            stderr: String::new(),
        };
        assert!(err.is_missing_remote_ref());

        let err = CommandError {
            message: "fatal: Couldn't find remote ref refs/notes/tideway".to_string(),
            stderr: String::new(),
        };
        assert!(err.is_missing_remote_ref());
    }
}
