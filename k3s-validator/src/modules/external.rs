//! Out-of-tree modules run as executables.
//!
//! An external module lives at `<external_dir>/<category>/<module>` (or with
//! a `.sh` suffix) and is started with the fixture namespace in its
//! environment:
//!
//! | variable         | value                      |
//! |------------------|----------------------------|
//! | `TEST_NAMESPACE` | fixture namespace          |
//! | `TEST_CATEGORY`  | category name              |
//! | `TEST_MODULE`    | module identifier          |
//!
//! Each stdout line of the form `PASS|FAIL|WARN|SKIP <test>: <message>`
//! becomes one result. Other lines are logged at debug. A non-zero exit
//! without any `FAIL` line records one failure for the module.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use k3s_validator_cluster::ClusterClient;
use k3s_validator_core::TestStatus;

use crate::context::ModuleContext;
use crate::error::ModuleError;

/// Candidate paths for a module, in lookup order.
pub fn candidates(dir: &Path, category: &str, module: &str) -> [PathBuf; 2] {
    let base = dir.join(category);
    [base.join(module), base.join(format!("{module}.sh"))]
}

/// First executable candidate, if any.
pub fn locate(dir: &Path, category: &str, module: &str) -> Option<PathBuf> {
    candidates(dir, category, module)
        .into_iter()
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Parse one `STATUS <test>: <message>` line.
pub fn parse_line(line: &str) -> Option<(TestStatus, &str, &str)> {
    let (status, rest) = line.trim().split_once(' ')?;
    let status = match status {
        "PASS" => TestStatus::Pass,
        "FAIL" => TestStatus::Fail,
        "WARN" => TestStatus::Warn,
        "SKIP" => TestStatus::Skip,
        _ => return None,
    };
    let (test, message) = match rest.split_once(':') {
        Some((test, message)) => (test.trim(), message.trim()),
        None => (rest.trim(), ""),
    };
    if test.is_empty() {
        return None;
    }
    Some((status, test, message))
}

/// Run the executable at `path` as the module described by `ctx`.
pub async fn run<C: ClusterClient>(path: &Path, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
    let info = *ctx.info();
    let mut command = Command::new(path);
    command
        .env("TEST_NAMESPACE", ctx.namespace())
        .env("TEST_CATEGORY", info.category.as_str())
        .env("TEST_MODULE", info.id)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    ctx.tracer()
        .command("exec", format_args!("{} (TEST_NAMESPACE={})", path.display(), ctx.namespace()));

    let external = |reason: String| ModuleError::External {
        path: path.display().to_string(),
        reason,
    };
    let output = command
        .spawn()
        .map_err(|e| external(e.to_string()))?
        .wait_with_output()
        .await
        .map_err(|e| external(e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut failures = 0usize;
    for line in stdout.lines() {
        match parse_line(line) {
            Some((status, test, message)) => {
                if status == TestStatus::Fail {
                    failures += 1;
                }
                ctx.record(status, test, message);
            }
            None if line.trim().is_empty() => {}
            None => debug!(module = %info, line, "external module output"),
        }
    }

    if !output.status.success() && failures == 0 {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.lines().last().unwrap_or_default().trim();
        let mut message = format!("{} exited with {}", path.display(), output.status);
        if !detail.is_empty() {
            message.push_str(": ");
            message.push_str(detail);
        }
        ctx.fail("exit-status", message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_lines() {
        assert_eq!(
            parse_line("PASS coredns: 2/2 replicas ready"),
            Some((TestStatus::Pass, "coredns", "2/2 replicas ready"))
        );
        assert_eq!(
            parse_line("  WARN traefik: not installed  "),
            Some((TestStatus::Warn, "traefik", "not installed"))
        );
        assert_eq!(
            parse_line("SKIP multi-node"),
            Some((TestStatus::Skip, "multi-node", ""))
        );
    }

    #[test]
    fn ignores_other_lines() {
        assert_eq!(parse_line("creating pod web-1a2b3c4d"), None);
        assert_eq!(parse_line("pass lowercase: no"), None);
        assert_eq!(parse_line("FAIL : empty name"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn candidates_cover_plain_and_shell_names() {
        let [plain, shell] = candidates(Path::new("/opt/modules"), "core", "dns");
        assert_eq!(plain, PathBuf::from("/opt/modules/core/dns"));
        assert_eq!(shell, PathBuf::from("/opt/modules/core/dns.sh"));
    }

    #[cfg(unix)]
    #[test]
    fn locate_requires_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("core")).unwrap();
        let script = dir.path().join("core").join("dns.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'PASS lookup: ok'\n").unwrap();
        assert_eq!(locate(dir.path(), "core", "dns"), None);

        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(locate(dir.path(), "core", "dns"), Some(script));
    }
}
