use std::path::PathBuf;

use uuid::Uuid;

/// Resolved layout of `~/.cache/agsh/` (§6). `dirs::cache_dir()` maps to
/// the platform cache directory (`~/.cache` on Linux, `~/Library/Caches`
/// on macOS, `%LOCALAPPDATA%` on Windows).
#[derive(Debug, Clone)]
pub struct AgshPaths {
    pub root: PathBuf,
    pub memory_dir: PathBuf,
    pub memory_db_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub audit_log_path: PathBuf,
    pub history_path: PathBuf,
    pub debug_log_path: PathBuf,
}

impl AgshPaths {
    pub fn task_log_path(&self, task_id: Uuid) -> PathBuf {
        self.tasks_dir.join(format!("{task_id}.jsonl"))
    }
}

pub fn resolve_agsh_paths() -> anyhow::Result<AgshPaths> {
    let root = if let Ok(override_dir) = std::env::var("AGSH_CACHE_DIR") {
        PathBuf::from(override_dir)
    } else {
        dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("could not resolve a platform cache directory"))?
            .join("agsh")
    };

    Ok(AgshPaths {
        memory_dir: root.join("memory"),
        memory_db_path: root.join("memory").join("megrams.sqlite"),
        tasks_dir: root.join("tasks"),
        audit_log_path: root.join("audit.jsonl"),
        history_path: root.join("history"),
        debug_log_path: root.join("debug.log"),
        root,
    })
}

/// Create every directory the persisted-state layout needs.
pub fn ensure_agsh_dirs(paths: &AgshPaths) -> std::io::Result<()> {
    std::fs::create_dir_all(&paths.root)?;
    std::fs::create_dir_all(&paths.memory_dir)?;
    std::fs::create_dir_all(&paths.tasks_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_env_var_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AGSH_CACHE_DIR", dir.path().to_string_lossy().to_string());
        let paths = resolve_agsh_paths().unwrap();
        assert_eq!(paths.root, dir.path());
        assert_eq!(paths.tasks_dir, dir.path().join("tasks"));
        std::env::remove_var("AGSH_CACHE_DIR");
    }

    #[test]
    fn task_log_path_is_scoped_under_tasks_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("AGSH_CACHE_DIR", dir.path().to_string_lossy().to_string());
        let paths = resolve_agsh_paths().unwrap();
        let id = Uuid::new_v4();
        assert_eq!(paths.task_log_path(id), paths.tasks_dir.join(format!("{id}.jsonl")));
        std::env::remove_var("AGSH_CACHE_DIR");
    }
}
