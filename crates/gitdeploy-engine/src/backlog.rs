//! On-disk per-reference "one pending push" slot with atomic replace.
//!
//! The backlog is a hint: the authoritative pending record is
//! `Registry::pending` in memory. Backlog files are not replayed on
//! startup (open question, resolved in `DESIGN.md`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gitdeploy_types::GitRef;
use tracing::info;

pub struct Backlog {
    tmp_dir: PathBuf,
}

impl Backlog {
    pub fn new(tmp_dir: PathBuf) -> Self {
        Self { tmp_dir }
    }

    fn repo_dir(&self, repo_id: &str) -> PathBuf {
        self.tmp_dir.join(repo_id)
    }

    fn dest_path(&self, repo_id: &str, ref_name: &str) -> PathBuf {
        self.repo_dir(repo_id).join(format!("{ref_name}.json"))
    }

    /// Write `git_ref` as JSON into `<TmpDir>/<RepoID>/tmp-<RefName>`, then
    /// rename over `<TmpDir>/<RepoID>/<RefName>.json`. Logs "replace" vs
    /// "create" depending on whether the destination already existed.
    pub fn save(&self, git_ref: &GitRef) -> Result<()> {
        let dir = self.repo_dir(&git_ref.repo_id);
        create_dir_mode_0755(&dir)?;

        let dest = self.dest_path(&git_ref.repo_id, &git_ref.ref_name);
        let existed = dest.exists();
        let tmp = dir.join(format!("tmp-{}", git_ref.ref_name));

        let data = serde_json::to_vec_pretty(git_ref).context("failed to serialize backlog entry")?;
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            f.write_all(&data)
                .with_context(|| format!("failed to write {}", tmp.display()))?;
            f.sync_all().ok();
        }
        fs::rename(&tmp, &dest)
            .with_context(|| format!("failed to rename {} to {}", tmp.display(), dest.display()))?;
        fsync_parent_dir(&dest);

        if existed {
            info!(repo_id = %git_ref.repo_id, ref_name = %git_ref.ref_name, "backlog.replace");
        } else {
            info!(repo_id = %git_ref.repo_id, ref_name = %git_ref.ref_name, "backlog.create");
        }

        Ok(())
    }

    /// Atomically rename the backlog file to a `.cur` sibling and read it
    /// back. Returns `None` if no backlog file existed for this ref (a
    /// legitimate case when the pending state came from memory).
    pub fn claim(&self, git_ref: &GitRef) -> Result<Option<GitRef>> {
        let dest = self.dest_path(&git_ref.repo_id, &git_ref.ref_name);
        if !dest.exists() {
            return Ok(None);
        }

        let cur = dest.with_extension("cur");
        fs::rename(&dest, &cur)
            .with_context(|| format!("failed to claim {}", dest.display()))?;

        let content = fs::read_to_string(&cur)
            .with_context(|| format!("failed to read claimed backlog {}", cur.display()))?;
        let parsed: GitRef = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse claimed backlog {}", cur.display()))?;

        let _ = fs::remove_file(&cur);

        Ok(Some(parsed))
    }

    /// Remove both the `.json` backlog file and any leftover `.cur` sibling.
    pub fn clear(&self, git_ref: &GitRef) -> Result<()> {
        let dest = self.dest_path(&git_ref.repo_id, &git_ref.ref_name);
        let cur = dest.with_extension("cur");
        let _ = fs::remove_file(&dest);
        let _ = fs::remove_file(&cur);
        Ok(())
    }
}

fn create_dir_mode_0755(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o755);
        fs::set_permissions(dir, perms).ok();
    }

    Ok(())
}

fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}
