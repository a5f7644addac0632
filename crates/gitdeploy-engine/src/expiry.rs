//! §4.10 expiry: the periodic `Recent` sweep plus the startup log-directory
//! walk that recovers jobs from leftover log files using the four-dot-part
//! filename convention `<ts>.<RefName>.<Rev>.<ext>`.

use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeZone, Utc};
use gitdeploy_types::{GitRef, Job, RefType};
use tracing::{info, warn};

use crate::registry::Registry;

const TIME_FILE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Runs forever, ticking every `stale_job_age / 2` and dropping `Recent`
/// entries whose `GitRef.Timestamp` predates `now - stale_job_age`.
pub async fn run_ticker(registry: std::sync::Arc<tokio::sync::Mutex<Registry>>, stale_job_age: Duration) {
    let mut interval = tokio::time::interval(stale_job_age / 2);
    loop {
        interval.tick().await;
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_job_age).unwrap_or(chrono::Duration::zero());
        let removed = registry.lock().await.expire_recent(cutoff);
        if removed > 0 {
            info!(removed, "expiry.swept");
        }
    }
}

/// §4.10 startup walk: enumerate `log_dir`, delete anything older than
/// `expired_log_age`, and for survivors newer than `stale_log_age` produce
/// a `Job` to seed `Recent` — from the `.json` snapshot when present,
/// otherwise synthesized from the filename alone. Filenames not matching
/// the four-part `<ts>.<RefName>.<Rev>.<ext>` pattern are ignored, as are
/// dotfiles and files beginning with `_` or `~`.
pub fn scan_log_dir(log_dir: &Path, expired_log_age: Duration, stale_log_age: Duration) -> Vec<Job> {
    let mut jobs = Vec::new();
    if !log_dir.exists() {
        return jobs;
    }

    let now = std::time::SystemTime::now();
    for entry in walk_files(log_dir) {
        let Some(file_name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') || file_name.starts_with('_') || file_name.starts_with('~') {
            continue;
        }

        let age = match std::fs::metadata(&entry).and_then(|m| m.modified()) {
            Ok(modified) => now.duration_since(modified).unwrap_or_default(),
            Err(e) => {
                warn!(path = %entry.display(), error = %e, "expiry: failed to stat log file");
                continue;
            }
        };

        if age > expired_log_age {
            let _ = std::fs::remove_file(&entry);
            continue;
        }
        if age > stale_log_age {
            continue;
        }
        // Only fully-written .json snapshots and leftover .log files (from
        // a crash mid-run) are worth recovering; .cur backlog files never
        // land under LogDir.
        let Some(ext) = entry.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if ext != "json" && ext != "log" {
            continue;
        }

        let Some(parts) = parse_four_part_name(file_name) else {
            continue;
        };

        if ext == "json" {
            if let Ok(content) = std::fs::read_to_string(&entry)
                && let Ok(job) = serde_json::from_str::<Job>(&content)
            {
                jobs.push(job);
                continue;
            }
        }

        if let Some(job) = synthesize_job(log_dir, &entry, &parts) {
            jobs.push(job);
        }
    }

    jobs
}

struct FourPartName {
    timestamp_raw: String,
    ref_name: String,
    rev: String,
}

fn parse_four_part_name(file_name: &str) -> Option<FourPartName> {
    let parts: Vec<&str> = file_name.splitn(4, '.').collect();
    if parts.len() != 4 {
        return None;
    }
    Some(FourPartName {
        timestamp_raw: parts[0].to_string(),
        ref_name: parts[1].to_string(),
        rev: parts[2].to_string(),
    })
}

/// Synthesizes a minimal `Job` from a log filename and its parent
/// directory (the `RepoID`): owner/repo are best-effort, derived from the
/// trailing path segments of `RepoID`.
fn synthesize_job(log_dir: &Path, path: &Path, parts: &FourPartName) -> Option<Job> {
    let repo_id = path
        .parent()?
        .strip_prefix(log_dir)
        .ok()?
        .to_str()?
        .to_string();
    if repo_id.is_empty() {
        return None;
    }

    let segments: Vec<&str> = repo_id.split('/').collect();
    let repo = segments.last().copied().unwrap_or_default().to_string();
    let owner = if segments.len() >= 2 {
        segments[segments.len() - 2].to_string()
    } else {
        String::new()
    };

    let timestamp = NaiveDateTime::parse_from_str(&parts.timestamp_raw, TIME_FILE_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))?;

    let git_ref = GitRef {
        repo_id: repo_id.clone(),
        timestamp,
        https_url: format!("//{repo_id}.git"),
        ssh_url: String::new(),
        rev: parts.rev.clone(),
        r#ref: format!("refs/heads/{}", parts.ref_name),
        ref_type: RefType::Branch,
        ref_name: parts.ref_name.clone(),
        owner,
        repo,
    };

    let mut job = Job::new(git_ref);
    job.started_at = timestamp;
    job.ended_at = Some(timestamp);
    job.flip_id_to_rev();
    Some(job)
}

fn walk_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(read_dir) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gitdeploy_types::RevId;
    use tempfile::tempdir;

    #[test]
    fn scan_log_dir_deletes_expired_files() {
        let td = tempdir().expect("tempdir");
        let repo_dir = td.path().join("git.example.com/owner/repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        let path = repo_dir.join("2020-01-01_00-00-00.master.abc1234.json");
        std::fs::write(&path, "{}").unwrap();

        // Backdate the mtime well past the expiry threshold.
        let old = std::time::SystemTime::now() - Duration::from_secs(3600);
        filetime_touch(&path, old);

        let jobs = scan_log_dir(td.path(), Duration::from_secs(60), Duration::from_secs(30));
        assert!(jobs.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn scan_log_dir_synthesizes_job_from_filename_when_no_json() {
        let td = tempdir().expect("tempdir");
        let repo_dir = td.path().join("git.example.com/owner/repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        let path = repo_dir.join("2020-01-01_00-00-00.master.abc1234890.log");
        std::fs::write(&path, "log output\n").unwrap();

        let jobs = scan_log_dir(td.path(), Duration::from_secs(3600 * 24 * 365), Duration::from_secs(3600 * 24 * 365));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].git_ref.ref_name, "master");
        assert_eq!(jobs[0].git_ref.rev, "abc1234890");
        assert_eq!(jobs[0].git_ref.repo_id, "git.example.com/owner/repo");
    }

    #[test]
    fn scan_log_dir_ignores_filenames_without_four_parts() {
        let td = tempdir().expect("tempdir");
        let repo_dir = td.path().join("git.example.com/owner/repo");
        std::fs::create_dir_all(&repo_dir).unwrap();
        std::fs::write(repo_dir.join("notes.txt"), "hi").unwrap();

        let jobs = scan_log_dir(td.path(), Duration::from_secs(60), Duration::from_secs(30));
        assert!(jobs.is_empty());
    }

    #[test]
    fn scan_log_dir_prefers_json_snapshot_over_synthesis() {
        let td = tempdir().expect("tempdir");
        let repo_dir = td.path().join("git.example.com/owner/repo");
        std::fs::create_dir_all(&repo_dir).unwrap();

        let git_ref = GitRef {
            repo_id: "git.example.com/owner/repo".to_string(),
            timestamp: Utc::now(),
            https_url: "https://git.example.com/owner/repo.git".to_string(),
            ssh_url: String::new(),
            rev: "deadbeef12".to_string(),
            r#ref: "refs/heads/master".to_string(),
            ref_type: RefType::Branch,
            ref_name: "master".to_string(),
            owner: "owner".to_string(),
            repo: "repo".to_string(),
        };
        let mut job = Job::new(git_ref.clone());
        job.exit_code = Some(0);
        job.flip_id_to_rev();

        let path = repo_dir.join("2020-01-01_00-00-00.master.deadbeef12.json");
        std::fs::write(&path, serde_json::to_vec(&job).unwrap()).unwrap();

        let jobs = scan_log_dir(td.path(), Duration::from_secs(3600 * 24 * 365), Duration::from_secs(3600 * 24 * 365));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].exit_code, Some(0));
        assert_eq!(jobs[0].id, RevId(format!("{}#{}", git_ref.repo_id, git_ref.rev)).to_url_safe().0);
    }

    fn filetime_touch(path: &Path, time: std::time::SystemTime) {
        let file = std::fs::File::open(path).expect("open");
        file.set_modified(time).expect("set mtime");
    }
}
