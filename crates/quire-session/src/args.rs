//! Launch arguments: a file to open, a room to join or text to start with.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Scheme of app links, e.g. `quire://open?room=...`.
pub const APP_SCHEME: &str = "quire";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionArgs {
    pub cwd: Option<PathBuf>,
    pub file: Option<PathBuf>,
    pub room: Option<String>,
    pub text: Option<String>,
}

impl SessionArgs {
    /// Interpret a command-line or deep-link argument.
    ///
    /// App links carry `room` and base64 `text` query parameters. Web share
    /// links name the room in their last path segment. Anything else is a
    /// file path, resolved against `cwd`.
    pub fn parse(source: &str, cwd: &Path) -> Self {
        let mut args = SessionArgs {
            cwd: Some(cwd.to_path_buf()),
            ..Default::default()
        };
        let source = source.trim();
        if source.is_empty() {
            return args;
        }

        match Url::parse(source) {
            Ok(url) if url.scheme() == APP_SCHEME => {
                for (key, value) in url.query_pairs() {
                    match key.as_ref() {
                        "room" if !value.is_empty() => args.room = Some(value.into_owned()),
                        "text" => args.text = decode_text(&value),
                        _ => {}
                    }
                }
            }
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                args.room = url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|room| !room.is_empty())
                    .map(str::to_string);
            }
            _ => args.file = Some(resolve_path(cwd, Path::new(source))),
        }
        args
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.room.is_none() && self.text.is_none()
    }
}

fn decode_text(value: &str) -> Option<String> {
    let bytes = BASE64.decode(value.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Make `path` absolute against `cwd` and fold `.` and `..` lexically, so
/// paths to files that do not exist yet still resolve.
fn resolve_path(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}
