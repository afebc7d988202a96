//! Integration tests for kcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn kcache() -> Command {
        let mut cmd = cargo_bin_cmd!("kcache");
        cmd.env_remove("KCACHE_CONFIG").env_remove("RUST_LOG");
        cmd
    }

    /// Config file whose cache lives inside the temp dir
    fn config_in(temp: &TempDir) -> std::path::PathBuf {
        let root = temp.path().join("cache");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            format!("[cache]\nroot = {:?}\nmax_size = 3\n", root.display().to_string()),
        )
        .unwrap();
        path
    }

    fn arg(path: &Path) -> &str {
        path.to_str().unwrap()
    }

    #[test]
    fn help_lists_commands() {
        kcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cached kernel package builds"))
            .stdout(predicate::str::contains("package"))
            .stdout(predicate::str::contains("cache"))
            .stdout(predicate::str::contains("install"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn version_displays() {
        kcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("kcache"));
    }

    #[test]
    fn config_path_honors_flag() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        kcache()
            .args(["--config", arg(&path), "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
        assert!(!path.exists());
    }

    #[test]
    fn config_init_creates_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kcache").join("config.toml");

        kcache()
            .args(["--config", arg(&path), "config", "init"])
            .assert()
            .success();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[cache]"));
        assert!(written.contains("[build]"));
    }

    #[test]
    fn config_show_prints_sections() {
        let temp = TempDir::new().unwrap();
        let path = config_in(&temp);

        kcache()
            .args(["--config", arg(&path), "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_size = 3"));
    }

    #[test]
    fn cache_list_empty() {
        let temp = TempDir::new().unwrap();
        let path = config_in(&temp);

        kcache()
            .args(["--config", arg(&path), "cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cache entries"));
    }

    #[test]
    fn cache_list_empty_json() {
        let temp = TempDir::new().unwrap();
        let path = config_in(&temp);

        kcache()
            .args(["--config", arg(&path), "cache", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn missing_config_file_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.toml");

        kcache()
            .args(["--config", arg(&path), "cache", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"));
    }

    #[test]
    fn install_help() {
        kcache()
            .args(["install", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--reboot"));
    }
}
