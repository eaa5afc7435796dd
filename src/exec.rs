//! External command execution
//!
//! The production collaborators drive the runtime binary, helm, and the
//! support-bundle CLI through here. Output is captured; a non-zero exit
//! becomes an [`Error::Command`] carrying the command line and stderr.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::Error;

/// Run a command and return its stdout.
pub(crate) async fn run_command(program: &Path, args: &[&str]) -> Result<String, Error> {
    let rendered = format!("{} {}", program.display(), args.join(" "));
    debug!(command = %rendered, "running");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::command(rendered.clone(), e.to_string()))?;

    if !output.status.success() {
        return Err(Error::command(
            rendered,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a command, discarding stdout. Convenience for callers that only care
/// about success.
pub(crate) async fn run_command_ok(program: &Path, args: &[&str]) -> Result<(), Error> {
    run_command(program, args).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_command(&PathBuf::from("echo"), &["hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_command_error() {
        let err = run_command_ok(&PathBuf::from("false"), &[]).await.unwrap_err();
        match err {
            Error::Command { command, .. } => assert!(command.contains("false")),
            other => panic!("expected command error, got {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_command_error() {
        let err = run_command_ok(&PathBuf::from("/nonexistent/definitely-not-here"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
    }
}
