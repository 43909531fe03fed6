use std::fs;
use std::path::Path;
use std::time::Duration;

use nix::sys::resource::{getrlimit, setrlimit, Resource};
use tokio::time::{sleep, Instant};

use restartrc::config::LaunchSpec;
use restartrc::procs::{DaemonLauncher, Launch};

// its own test binary: the open file limit is process wide

async fn wait_for_log(path: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let content = fs::read_to_string(path).unwrap_or_default();
        if content.ends_with('\n') || Instant::now() > deadline {
            return content;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_launched_program_inherits_fd_limit() {
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
    let fd_limit = soft - 1;

    let dir = tempfile::tempdir().unwrap();
    let spec = LaunchSpec::new("sh", dir.path(), "svc.log")
        .arg("-c")
        .arg("ulimit -n")
        .fd_limit(fd_limit as u64);

    let launched = DaemonLauncher::new().launch(&spec).await;
    let ours = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
    setrlimit(Resource::RLIMIT_NOFILE, soft, hard).unwrap();

    launched.unwrap();
    assert_eq!(ours, (fd_limit, hard));
    assert_eq!(
        wait_for_log(&dir.path().join("svc.log")).await.trim(),
        fd_limit.to_string()
    );
}

#[tokio::test]
async fn test_fd_limit_above_hard_limit_is_fatal() {
    let (_, hard) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
    // root may raise the hard limit
    if unsafe { libc::geteuid() } == 0 || hard == libc::RLIM_INFINITY {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let spec = LaunchSpec::new("true", dir.path(), "svc.log").fd_limit(hard as u64 + 1);

    let err = DaemonLauncher::new().launch(&spec).await.unwrap_err();
    assert!(err.is_launch_failure());
    assert!(!dir.path().join("svc.log").exists());
}
