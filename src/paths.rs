//! Remote path layout for a game server's log and CSV drops.
//!
//! The remote filesystem names its per-server directory after the host and
//! the externally visible server id, so the original id takes precedence over
//! the normalized one whenever both are known.

/// Placeholder host used when no hostname is configured.
pub const UNKNOWN_HOST: &str = "server";

const LOG_DIR: &str = "Logs";
const LOG_FILE: &str = "Deadside.log";
const CSV_DIR: [&str; 2] = ["actual1", "deathlogs"];

/// Inputs for resolving one server's remote layout.
#[derive(Debug, Clone, Copy)]
pub struct PathRequest<'a> {
    pub hostname: &'a str,
    pub server_id: &'a str,
    pub original_server_id: Option<&'a str>,
    pub world_dir: Option<&'a str>,
    pub root_path: &'a str,
}

impl<'a> PathRequest<'a> {
    pub fn new(hostname: &'a str, server_id: &'a str) -> Self {
        Self {
            hostname,
            server_id,
            original_server_id: None,
            world_dir: None,
            root_path: "/",
        }
    }

    pub fn with_original_id(mut self, original_server_id: Option<&'a str>) -> Self {
        self.original_server_id = original_server_id;
        self
    }

    pub fn with_world_dir(mut self, world_dir: Option<&'a str>) -> Self {
        self.world_dir = world_dir;
        self
    }

    pub fn with_root(mut self, root_path: &'a str) -> Self {
        self.root_path = root_path;
        self
    }
}

/// Resolved remote paths for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
    pub base_dir: String,
    pub log_dir: String,
    pub log_file: String,
    pub csv_dir: String,
}

/// Strip the port from a `host:port` string. Empty hosts become [`UNKNOWN_HOST`].
pub fn clean_hostname(hostname: &str) -> &str {
    let host = hostname.trim();
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() { UNKNOWN_HOST } else { host }
}

/// The id used in remote paths: the original id when present, else the normalized id.
pub fn path_server_id<'a>(server_id: &'a str, original_server_id: Option<&'a str>) -> &'a str {
    match original_server_id.map(str::trim) {
        Some(original) if !original.is_empty() => original,
        _ => server_id,
    }
}

/// Resolve the remote layout. Pure, never fails.
pub fn resolve(request: PathRequest<'_>) -> ServerPaths {
    let host = clean_hostname(request.hostname);
    let id = path_server_id(request.server_id, request.original_server_id);

    let base_dir = join(request.root_path, &format!("{host}_{id}"));
    let log_dir = join(&base_dir, LOG_DIR);
    let log_file = join(&log_dir, LOG_FILE);

    let mut csv_dir = CSV_DIR
        .iter()
        .fold(base_dir.clone(), |acc, part| join(&acc, part));
    if let Some(world) = request.world_dir.map(|w| w.trim_matches('/'))
        && !world.is_empty()
    {
        csv_dir = join(&csv_dir, world);
    }

    ServerPaths {
        base_dir,
        log_dir,
        log_file,
        csv_dir,
    }
}

/// Make a server id safe to use as a local file name.
///
/// Distinct ids can map to the same stem (`a/b` and `a_b`); configuration
/// rejects such pairs.
pub fn file_stem(server_id: &str) -> String {
    server_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Join two remote path segments with exactly one `/` between them.
pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_strips_port_and_prefers_original_id() {
        let paths = resolve(
            PathRequest::new("79.127.236.1:8822", "a1b2c3").with_original_id(Some("7020")),
        );

        assert_eq!(paths.base_dir, "/79.127.236.1_7020");
        assert_eq!(paths.log_dir, "/79.127.236.1_7020/Logs");
        assert_eq!(paths.log_file, "/79.127.236.1_7020/Logs/Deadside.log");
        assert_eq!(paths.csv_dir, "/79.127.236.1_7020/actual1/deathlogs");
    }

    #[test]
    fn test_resolve_falls_back_to_normalized_id() {
        let paths = resolve(PathRequest::new("example.com", "7020").with_original_id(Some("  ")));
        assert_eq!(paths.base_dir, "/example.com_7020");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("7020"), "7020");
        assert_eq!(file_stem("eu-1.main"), "eu-1.main");
        assert_eq!(file_stem("a/b"), file_stem("a_b"));
        assert_eq!(file_stem("../x y"), ".._x_y");
    }

    #[test]
    fn test_resolve_empty_host_uses_placeholder() {
        let paths = resolve(PathRequest::new("", "42"));
        assert_eq!(paths.base_dir, "/server_42");
    }

    #[test]
    fn test_resolve_with_world_dir_and_root() {
        let paths = resolve(
            PathRequest::new("host", "1")
                .with_world_dir(Some("/world_0/"))
                .with_root("/home/game/"),
        );
        assert_eq!(paths.base_dir, "/home/game/host_1");
        assert_eq!(paths.csv_dir, "/home/game/host_1/actual1/deathlogs/world_0");
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let request = PathRequest::new("h:22", "s").with_original_id(Some("o"));
        assert_eq!(resolve(request), resolve(request));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a/", "/b"), "/a/b");
        assert_eq!(join("", "b"), "/b");
    }
}
