//! `GET /api/admin/repos`: an informational catalog of configured repos.
//!
//! Two independent sources, concatenated: the whitespace-separated trusted
//! repo list, and any subdirectory of `ScriptsPath` that holds its own
//! `deploy.sh`. The second source is purely advisory — `runner`/`promote`
//! always invoke the flat `<ScriptsPath>/deploy.sh`, never a per-repo one.

use std::path::Path;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct ReposResponse {
    success: bool,
    repos: Vec<Repo>,
}

#[derive(Serialize)]
pub struct Repo {
    id: String,
    clone_url: String,
    #[serde(rename = "_promotions")]
    promotions: Vec<String>,
}

pub async fn list_repos(State(state): State<AppState>) -> Json<ReposResponse> {
    let mut repos: Vec<Repo> = state
        .config
        .repo_list
        .split_whitespace()
        .map(|id| repo_entry(id, &state.config.promotions))
        .collect();

    for id in scripted_repo_ids(&state.config.scripts_path) {
        repos.push(repo_entry(&id, &state.config.promotions));
    }

    Json(ReposResponse { success: true, repos })
}

fn repo_entry(id: &str, promotions: &[String]) -> Repo {
    Repo {
        id: id.to_string(),
        clone_url: format!("https://{id}.git"),
        promotions: promotions.to_vec(),
    }
}

/// Every `deploy.sh` found strictly under a subdirectory of `scripts_path`,
/// reported as the relative directory it lives in. The flat
/// `scripts_path/deploy.sh` itself is excluded — it names no particular repo.
fn scripted_repo_ids(scripts_path: &Path) -> Vec<String> {
    let mut ids = Vec::new();
    walk(scripts_path, scripts_path, &mut ids);
    ids
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out);
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) != Some("deploy.sh") {
            continue;
        }
        let Some(parent) = path.parent() else { continue };
        if parent == root {
            continue;
        }
        if let Ok(rel) = parent.strip_prefix(root) {
            if let Some(id) = rel.to_str() {
                out.push(id.replace(std::path::MAIN_SEPARATOR, "/"));
            }
        }
    }
}
