use std::{env, fs, path::PathBuf, process::Command};

const CONFIG: &str = r#"
[field]
width = 48
height = 32
boundary = "reflect"

[agents]
max_particles = 300
count = 256
n_species = 2
spawn = "ring"
seed = 99

[motion]
move_speed = 1.0
speed_multiplier = 1.5
sensor_angle_offset = 0.3927
sensor_distance = 6.0
rotation_speed = 0.3

[trail]
deposit_amount = 1.0
trail_radius = 1
decay_rate = 0.05
diffuse_rate = 0.5
cutoff = 0.001

[palette]
colors = [[1.0, 1.0, 0.0, 1.0], [0.0, 1.0, 1.0, 1.0]]

[output]
steps_per_save = 8
saves_per_file = 16
save_agents = true
save_trail = false
"#;

fn run_bin(args: &[&str]) -> bool {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_slime"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    if !output.status.success() {
        let stdout_str = String::from_utf8_lossy(&output.stdout);
        let stderr_str = String::from_utf8_lossy(&output.stderr);
        eprintln!("{args:?} failed\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n");
    }
    output.status.success()
}

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(test_dir.join("config.toml"), CONFIG).expect("failed to write config file");

    let dir = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", dir, "create"]));
    assert!(run_bin(&["--sim-dir", dir, "create"]));

    assert!(run_bin(&["--sim-dir", dir, "resume", "--run-idx", "0"]));
    assert!(run_bin(&["--sim-dir", dir, "resume", "--run-idx", "1"]));
    assert!(!run_bin(&["--sim-dir", dir, "resume", "--run-idx", "7"]));

    let run_0 = test_dir.join("run-0000");
    assert!(run_0.join("trajectory-0000.msgpack").is_file());
    assert!(run_0.join("trajectory-0001.msgpack").is_file());
    assert!(run_0.join("checkpoint.msgpack").is_file());

    assert!(run_bin(&["--sim-dir", dir, "analyze"]));
    assert!(run_0.join("results.msgpack").is_file());
    assert!(test_dir.join("run-0001/results.msgpack").is_file());

    assert!(run_bin(&["--sim-dir", dir, "clean"]));
    assert!(!run_0.exists());
    assert!(test_dir.join("config.toml").is_file());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn rejects_invalid_config() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("rejects_invalid_config");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    let config = CONFIG.replace("count = 256", "count = 301");
    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");

    let dir = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(!run_bin(&["--sim-dir", dir, "create"]));
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn resume_applies_edited_config() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("resume_applies_edited_config");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(test_dir.join("config.toml"), CONFIG).expect("failed to write config file");

    let dir = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    assert!(run_bin(&["--sim-dir", dir, "create"]));

    let tuned = CONFIG
        .replace("decay_rate = 0.05", "decay_rate = 0.1")
        .replace("count = 256", "count = 200");
    fs::write(test_dir.join("config.toml"), &tuned).expect("failed to write config file");
    assert!(run_bin(&["--sim-dir", dir, "resume", "--run-idx", "0"]));

    let grown = tuned.replace("count = 200", "count = 256");
    fs::write(test_dir.join("config.toml"), grown).expect("failed to write config file");
    assert!(!run_bin(&["--sim-dir", dir, "resume", "--run-idx", "0"]));

    let resized = tuned.replace("width = 48", "width = 50");
    fs::write(test_dir.join("config.toml"), resized).expect("failed to write config file");
    assert!(!run_bin(&["--sim-dir", dir, "resume", "--run-idx", "0"]));

    let run_0 = test_dir.join("run-0000");
    assert!(run_0.join("trajectory-0001.msgpack").is_file());
    assert!(!run_0.join("trajectory-0002.msgpack").exists());

    fs::remove_dir_all(&test_dir).ok();
}
