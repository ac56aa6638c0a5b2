//! Git source synchronisation
//!
//! Updates are always a hard fetch + reset + clean so the working tree
//! matches the remote ref exactly. Any failure is returned to the caller,
//! which must abort the deploy.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::supervisor::{OperationLog, ProcessSupervisor};
use crate::errors::DockyardError;

const GIT: &str = "git";

/// Bring `target` in line with the remote, cloning if missing
pub async fn sync_source(
    supervisor: &ProcessSupervisor,
    url: &str,
    branch: Option<&str>,
    target: &Path,
    log: &mut OperationLog,
) -> Result<(), DockyardError> {
    validate_ref("repository url", url)?;
    if let Some(branch) = branch {
        validate_ref("branch", branch)?;
    }

    if target.join(".git").is_dir() {
        update(supervisor, branch, target, log).await
    } else {
        clone(supervisor, url, branch, target, log).await
    }
}

async fn clone(
    supervisor: &ProcessSupervisor,
    url: &str,
    branch: Option<&str>,
    target: &Path,
    log: &mut OperationLog,
) -> Result<(), DockyardError> {
    info!("Cloning {} into {}", url, target.display());
    log.line("📥 Cloning repository...");

    if target.exists() {
        tokio::fs::remove_dir_all(target).await?;
    }
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let mut args = vec!["clone".to_string()];
    if let Some(branch) = branch {
        args.push("--branch".to_string());
        args.push(branch.to_string());
    }
    args.push("--".to_string());
    args.push(url.to_string());
    args.push(target.to_string_lossy().into_owned());

    run_git(supervisor, parent, args, log).await?;
    log.line("✅ Repository cloned");
    Ok(())
}

async fn update(
    supervisor: &ProcessSupervisor,
    branch: Option<&str>,
    target: &Path,
    log: &mut OperationLog,
) -> Result<(), DockyardError> {
    let branch = match branch {
        Some(branch) => branch.to_string(),
        None => current_branch(target).await?,
    };
    info!("Updating {} to origin/{}", target.display(), branch);
    log.line(&format!("📥 Pulling latest changes (origin/{})...", branch));

    let steps = [
        vec!["fetch".to_string(), "origin".to_string(), branch.clone()],
        vec!["reset".to_string(), "--hard".to_string(), format!("origin/{}", branch)],
        vec!["clean".to_string(), "-fdx".to_string()],
    ];
    for args in steps {
        run_git(supervisor, target, args, log).await?;
    }

    log.line("✅ Source is up to date");
    Ok(())
}

async fn run_git(
    supervisor: &ProcessSupervisor,
    workdir: &Path,
    args: Vec<String>,
    log: &mut OperationLog,
) -> Result<(), DockyardError> {
    debug!("git {}", args.join(" "));
    let mut run = supervisor.spawn(workdir, GIT, &args, &[])?;
    let code = run.drain_into(log).await?;
    if code != 0 {
        let verb = args.first().map(String::as_str).unwrap_or("command");
        return Err(DockyardError::SourceError(format!(
            "git {} failed with exit code {}",
            verb, code
        )));
    }
    Ok(())
}

async fn current_branch(target: &Path) -> Result<String, DockyardError> {
    let output = Command::new(GIT)
        .current_dir(target)
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .await
        .map_err(|e| DockyardError::SourceError(format!("Failed to run git: {}", e)))?;

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() || branch.is_empty() || branch == "HEAD" {
        return Err(DockyardError::SourceError(
            "Unable to determine the checked out branch".to_string(),
        ));
    }
    validate_ref("branch", &branch)?;
    Ok(branch)
}

/// Subject and body of the `HEAD` commit, if the tree is a git checkout
pub async fn last_commit_message(target: &Path) -> Option<String> {
    let output = Command::new(GIT)
        .current_dir(target)
        .args(["log", "-1", "--pretty=%B"])
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let message = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (!message.is_empty()).then_some(message)
        }
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to read last commit message: {}", e);
            None
        }
    }
}

/// Refs and urls must not be mistaken for options
fn validate_ref(what: &str, value: &str) -> Result<(), DockyardError> {
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_whitespace) {
        return Err(DockyardError::ValidationError(format!(
            "Invalid {}: '{}'",
            what, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::supervisor::LiveSink;
    use std::time::Duration;

    #[test]
    fn test_validate_ref() {
        assert!(validate_ref("branch", "main").is_ok());
        assert!(validate_ref("branch", "feature/x").is_ok());
        assert!(validate_ref("branch", "--upload-pack=evil").is_err());
        assert!(validate_ref("branch", "a b").is_err());
        assert!(validate_ref("branch", "").is_err());
    }

    #[tokio::test]
    async fn test_invalid_branch_fails_before_touching_tree() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("p1");
        let mut log = OperationLog::new(LiveSink::detached(), Duration::from_secs(2));

        let result = sync_source(
            &ProcessSupervisor::new(),
            "https://example.com/repo.git",
            Some("-x"),
            &target,
            &mut log,
        )
        .await;

        assert!(matches!(result, Err(DockyardError::ValidationError(_))));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_last_commit_message_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(last_commit_message(dir.path()).await.is_none());
    }
}
