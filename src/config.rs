use std::path::PathBuf;

pub const ENV_LOG_LEVEL: &str = "GRADEBOOKD_LOG";
pub const ENV_LOG_DIR: &str = "GRADEBOOKD_LOG_DIR";
pub const ENV_WORKSPACE: &str = "GRADEBOOKD_WORKSPACE";

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Config {
            log_level: non_blank(ENV_LOG_LEVEL).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_dir: non_blank(ENV_LOG_DIR).map(PathBuf::from),
            workspace: non_blank(ENV_WORKSPACE).map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset_or_blank() {
        let env: HashMap<&str, &str> = HashMap::from([(ENV_WORKSPACE, "  ")]);
        let cfg = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.log_dir, None);
        assert_eq!(cfg.workspace, None);
    }

    #[test]
    fn reads_all_keys() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_DIR, "/tmp/gb-logs"),
            (ENV_WORKSPACE, "/tmp/gb"),
        ]);
        let cfg = Config::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/tmp/gb-logs")));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/gb")));
    }
}
