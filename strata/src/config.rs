use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DOCKER_HOST: &str = "http://localhost:2375";
pub const DEFAULT_MAX_CONCURRENT_LAYERS: usize = 4;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 120;

/// Engine endpoint taken from `DOCKER_HOST`, with `tcp://` rewritten to
/// `http://`.
pub fn get_docker_host() -> String {
    let host = env::var("DOCKER_HOST").unwrap_or(DEFAULT_DOCKER_HOST.to_string());
    normalize_docker_host(&host)
}

pub(crate) fn normalize_docker_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    match host.strip_prefix("tcp://") {
        Some(rest) => format!("http://{rest}"),
        None => host.to_string(),
    }
}

pub fn get_max_concurrent_layers() -> usize {
    parse_concurrency(env::var("STRATA_MAX_CONCURRENT_LAYERS").ok().as_deref())
}

pub(crate) fn parse_concurrency(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENT_LAYERS)
        .max(1)
}

pub fn get_acquire_timeout() -> Duration {
    let secs = env::var("STRATA_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Parent directory for temporary exports, `None` means the OS default.
pub fn get_tmp_dir() -> Option<PathBuf> {
    env::var_os("STRATA_TMP_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
