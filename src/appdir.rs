//! App data directory utility.
//! Resolves the operating-system-specific directory used to store this
//! daemon's on-disk configuration and credential files.
use std::{
    env,
    ops::Add,
    path::{Path, PathBuf},
};

/// Returns an operating-system-specific directory for storing application
/// data for an application.
///
/// The `app_name` parameter is the name of the application the data
/// directory is being requested for. This function will prepend a period to
/// `app_name` for POSIX style operating systems since that is standard
/// practice. An empty `app_name` or one with a single dot is treated as
/// requesting the current directory so only "." will be returned. Further,
/// the first character of `app_name` will be made lowercase for POSIX style
/// operating systems and uppercase for Mac and Windows since that is
/// standard practice.
///
/// The `roaming` parameter only applies to Windows where it specifies the
/// roaming application data profile (%APPDATA%) should be used instead of
/// the local one (%LOCALAPPDATA%) that is used by default.
///
/// # Example
///
/// ```
/// let dir = nodewsrpc::appdir::get_app_data_dir("mynode", false);
/// ```
/// ## Gives
///
///   POSIX (Linux/BSD): ~/.mynode
///
///   Mac OS: $HOME/Library/Application Support/Mynode
///
///   Windows: %LOCALAPPDATA%\Mynode
///
///   Plan 9: $home/mynode
pub fn get_app_data_dir(app_name: &str, roaming: bool) -> Option<PathBuf> {
    let dir_data = DirData {
        app_name,
        os: env::consts::OS,
        roaming,
    };

    dir_data.get_app_data_dir()
}

struct DirData<'a> {
    os: &'a str,
    app_name: &'a str,
    roaming: bool,
}

impl<'a> DirData<'a> {
    fn get_app_data_dir(mut self) -> Option<PathBuf> {
        if self.app_name.is_empty() || self.app_name == "." {
            return None;
        }

        // Strip "." if caller prepended a period to the name.
        if let Some(e) = self.app_name.strip_prefix('.') {
            self.app_name = e;
        }

        match dirs::home_dir() {
            Some(dir) => self.retrieve_from_os(&dir),

            None => match env::var("HOME") {
                Ok(val) => self.retrieve_from_os(Path::new(&val)),

                _ => None,
            },
        }
    }

    /// Retrieves the app data path using the caller's OS attributes.
    fn retrieve_from_os(&self, home_dir: &Path) -> Option<PathBuf> {
        let app_name_upper = self.app_name[..1]
            .to_ascii_uppercase()
            .add(&self.app_name[1..]);

        let app_name_lower = self.app_name[..1]
            .to_ascii_lowercase()
            .add(&self.app_name[1..]);

        match self.os {
            "windows" => {
                // Windows XP and before didn't have a LOCALAPPDATA, so fall
                // back to regular APPDATA if LOCALAPPDATA is not set.
                if let Ok(mut app_data) = env::var("LOCALAPPDATA") {
                    if app_data.is_empty() || self.roaming {
                        match env::var("APPDATA") {
                            Ok(val) => {
                                app_data = val;
                            }

                            _ => return None,
                        }
                    }

                    return Some(Path::new(&app_data).join(app_name_upper));
                }

                None
            }

            "macos" => {
                if home_dir.as_os_str().is_empty() {
                    return None;
                }

                Some(
                    Path::new(&home_dir)
                        .join("Library")
                        .join("Application Support")
                        .join(app_name_upper),
                )
            }

            "plan9" => {
                if home_dir.as_os_str().is_empty() {
                    return None;
                }

                Some(Path::new(&home_dir).join(app_name_lower))
            }

            _ => {
                if home_dir.as_os_str().is_empty() {
                    return None;
                }

                let mut dotted_path = String::from(".");
                dotted_path.push_str(app_name_lower.as_str());

                Some(Path::new(&home_dir).join(dotted_path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_app_name_returns_none() {
        assert!(get_app_data_dir("", false).is_none());
        assert!(get_app_data_dir(".", false).is_none());
    }
}
