//! Config file lifecycle: first-run initialization and reload.

use robot_taskd::config::Config;
use tempfile::TempDir;

#[tokio::test]
async fn first_run_writes_defaults() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("nested").join("robot-taskd");

    let config = Config::load_or_init(Some(&dir)).await.unwrap();
    let on_disk = std::fs::read_to_string(dir.join("config.toml")).unwrap();

    assert!(on_disk.contains("[mqtt]"));
    assert!(on_disk.contains("[engine]"));
    assert!(on_disk.contains("robot/navigation"));
    assert_eq!(config.config_dir(), dir.as_path());
}

#[cfg(unix)]
#[tokio::test]
async fn first_run_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    Config::load_or_init(Some(tmp.path())).await.unwrap();
    let mode = std::fs::metadata(tmp.path().join("config.toml"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o077, 0);
}

#[tokio::test]
async fn existing_file_is_not_overwritten() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("config.toml"),
        "[engine]\ncompletion_cooldown_secs = 3.0\nframe_id = \"odom\"\n",
    )
    .unwrap();

    let config = Config::load_or_init(Some(tmp.path())).await.unwrap();
    assert!((config.engine.completion_cooldown_secs - 3.0).abs() < f64::EPSILON);
    assert_eq!(config.engine.frame_id, "odom");

    let on_disk = std::fs::read_to_string(tmp.path().join("config.toml")).unwrap();
    assert!(!on_disk.contains("[mqtt]"));
}

#[tokio::test]
async fn invalid_engine_section_fails_load() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("config.toml"),
        "[engine]\ngripper_dwell_secs = -1.0\n",
    )
    .unwrap();

    let err = Config::load_or_init(Some(tmp.path())).await.unwrap_err();
    assert!(err.to_string().contains("gripper_dwell_secs"));
}
