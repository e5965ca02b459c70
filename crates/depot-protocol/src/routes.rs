//! HTTP route paths served by the depot.

pub const LATEST_VERSION: &str = "/latest_version";
pub const DOWNLOAD: &str = "/download";
pub const DOWNLOAD_VERSION: &str = "/download/:version";
pub const VERSION_REPORT: &str = "/version";
pub const VERSIONS: &str = "/versions";
pub const STATUS: &str = "/status";

/// Concrete download path for a version, percent-encoded.
pub fn download_path(version: &str) -> String {
    format!("{}/{}", DOWNLOAD, urlencoding::encode(version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_path() {
        assert_eq!(download_path("1.1.0"), "/download/1.1.0");
        assert_eq!(download_path("1.0.0+build 7"), "/download/1.0.0%2Bbuild%207");
    }
}
