//! TOML settings file support
//!
//! Long-running aging jobs tend to be launched from job schedulers where a
//! checked-in settings file beats a 20-option command line. The file uses
//! the same field names as [`Config`]; absent fields keep their defaults and
//! command-line options override whatever the file says.
//!
//! ```toml
//! top_directory = "/mnt/scratch/churn"
//! max_files = 100000
//! file_size = "64:1024"
//! rand_distr_type = "gaussian"
//! mean_index_velocity = 0.5
//! threads = 8
//! ```

use super::Config;
use anyhow::Context;
use std::path::Path;

/// Load a configuration from a TOML settings file
pub fn load(path: &Path) -> crate::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let config: Config = toml::from_str(&text)
        .with_context(|| format!("cannot parse {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DistributionType, Size};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_partial_settings() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
top_directory = "/mnt/churn"
max_files = 4096
file_size = "64:1024"
rand_distr_type = "gaussian"
threads = 8
"#
        )
        .unwrap();

        let config = load(f.path()).unwrap();
        assert_eq!(config.top_directory.to_str(), Some("/mnt/churn"));
        assert_eq!(config.max_files, 4096);
        assert_eq!(config.file_size, Size::Range(64, 1024));
        assert_eq!(config.rand_distr_type, DistributionType::Gaussian);
        assert_eq!(config.threads, 8);
        // untouched fields keep their defaults
        assert_eq!(config.blocksize, Size::Fixed(4));
        assert_eq!(config.levels, 2);
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "max_files = \"not a number").unwrap();
        assert!(load(f.path()).is_err());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        assert!(load(Path::new("/nonexistent/fschurn.toml")).is_err());
    }
}
