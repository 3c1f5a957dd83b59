//! XDG Base Directory paths for kiln.
//!
//! The plugin host keeps its registry and configuration under the config
//! directory and gives every plugin a private directory under the data
//! directory. XDG paths are used on every platform so that documentation and
//! scripts can name one location.

use std::path::PathBuf;

/// Get the kiln config directory.
///
/// Returns `$XDG_CONFIG_HOME/kiln` if set, otherwise `~/.config/kiln`.
/// This is where `config.toml`, the plugin registry and user plugins live.
///
/// # Examples
///
/// ```
/// use kiln_paths::config_dir;
///
/// let plugins = config_dir().join("plugins");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the kiln data directory.
///
/// Returns `$XDG_DATA_HOME/kiln` if set, otherwise `~/.local/share/kiln`.
/// Each plugin receives `<data_dir>/plugins/<name>` for its own files.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Directory holding user-installed plugin packages.
pub fn plugins_dir() -> PathBuf {
    config_dir().join("plugins")
}

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    if let Some(base) = std::env::var_os(var).filter(|v| !v.is_empty()) {
        PathBuf::from(base).join("kiln")
    } else if let Some(home) = dirs::home_dir() {
        home.join(home_relative).join("kiln")
    } else {
        PathBuf::from(home_relative).join("kiln")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_dir_ends_with_kiln() {
        let path = config_dir();
        assert!(path.ends_with("kiln"), "config_dir should end with 'kiln'");
    }

    #[test]
    #[serial]
    fn test_data_dir_ends_with_kiln() {
        let path = data_dir();
        assert!(path.ends_with("kiln"), "data_dir should end with 'kiln'");
    }

    #[test]
    #[serial]
    fn test_config_dir_respects_xdg_env() {
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", "/tmp/test-config");
        }
        let path = config_dir();
        assert_eq!(path, PathBuf::from("/tmp/test-config/kiln"));
        assert_eq!(plugins_dir(), PathBuf::from("/tmp/test-config/kiln/plugins"));
        unsafe {
            std::env::remove_var("XDG_CONFIG_HOME");
        }
    }

    #[test]
    #[serial]
    fn test_empty_xdg_var_falls_back_to_home() {
        unsafe {
            std::env::set_var("XDG_DATA_HOME", "");
        }
        let path = data_dir();
        assert!(path.ends_with(".local/share/kiln") || path.ends_with("kiln"));
        assert_ne!(path, PathBuf::from("kiln"));
        unsafe {
            std::env::remove_var("XDG_DATA_HOME");
        }
    }
}
