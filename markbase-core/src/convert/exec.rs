use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

/// Run an external tool with a hard timeout. The child is killed when the
/// timeout elapses (kill_on_drop); all of the coordinator's external calls
/// go through here so cancellation never leaves processes behind.
pub(crate) async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    label: &str,
) -> std::result::Result<Output, String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| format!("{label} not found or not executable: {e}"))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{label} failed to run: {e}")),
        Err(_) => Err(format!("{label} timed out after {}s", timeout.as_secs())),
    }
}

/// Trimmed stderr for error messages; external tools can be noisy.
pub(crate) fn stderr_snippet(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let trimmed = text.trim();
    if trimmed.len() > 500 {
        let mut end = 500;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}
