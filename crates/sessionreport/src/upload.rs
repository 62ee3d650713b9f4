//! Report upload through the external rclone binary. A non-zero exit is
//! fatal; the status code and stderr surface verbatim.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};

pub fn rclone_copy(path: &Path, remote: &str, dirname: &str) -> Result<()> {
    let destination = format!("{remote}{dirname}");
    let output = Command::new("rclone")
        .arg("copy")
        .arg(path)
        .arg(&destination)
        .output()
        .context("failed to launch rclone")?;
    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("rclone exited with status {code}: {}", stderr.trim()));
    }
    Ok(())
}
