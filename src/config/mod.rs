pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// `$env{VAR_NAME}` where the name starts with a letter or underscore.
pub(crate) static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
});

pub use parse::{load_config, validate_config, ConfigError, ResolvedConfig};
pub use types::{AwsConfig, Config, OutputConfig, OutputFormat, PollerConfig};

const USER_CONFIG: &str = ".config/cwtail/config.yml";
const SYSTEM_CONFIG: &str = "/etc/cwtail/config.yml";

/// Replace `$env{NAME}` references with the variable's value.
///
/// Unset variables are left as written so the loader can report them.
/// Shell-style `${NAME}` is never touched; CloudWatch filter patterns use it.
pub fn expand_env_vars(text: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return path.to_path_buf();
    };

    match path.strip_prefix("~") {
        Ok(rest) if rest.as_os_str().is_empty() => home,
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Pick the config file to load.
///
/// An explicit path always wins (even if it does not exist, so the loader
/// can report it). Otherwise the first existing file of
/// `~/.config/cwtail/config.yml` and `/etc/cwtail/config.yml` is used.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    dirs::home_dir()
        .map(|home| home.join(USER_CONFIG))
        .into_iter()
        .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG)))
        .find(|candidate| candidate.exists())
}
