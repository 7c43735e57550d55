//! Output file layout.
//!
//! `<root>/<dump name>/<guild name | DMs>/<channel name>.txt`, with every
//! component made safe to use as a single file name.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::Channel;

pub const DIRECT_MESSAGES_DIR: &str = "DMs";
const REPLACEMENT: char = '!';
const MAX_COMPONENT_LEN: usize = 255;
const CHANNEL_EXTENSION: &str = ".txt";
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Turn arbitrary text into something usable as one path component.
///
/// Path separators, characters reserved on common filesystems and control
/// characters become `!`; runs of replacements collapse into one.
pub fn sanitize_file_name(name: &str) -> String {
    sanitize_with_limit(name, MAX_COMPONENT_LEN)
}

/// File name for a channel dump. The stem is cut short enough that the
/// extension still fits in one path component.
pub fn channel_file_name(name: &str) -> String {
    let stem = sanitize_with_limit(name, MAX_COMPONENT_LEN - CHANNEL_EXTENSION.len());
    format!("{}{}", stem, CHANNEL_EXTENSION)
}

fn sanitize_with_limit(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let bad = c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if bad {
            if !out.ends_with(REPLACEMENT) {
                out.push(REPLACEMENT);
            }
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim().trim_end_matches('.');
    let mut out = if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        REPLACEMENT.to_string()
    } else {
        trimmed.to_string()
    };

    let stem = out.split('.').next().unwrap_or_default().to_ascii_lowercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        out.push(REPLACEMENT);
    }

    if out.len() > max_len {
        let mut end = max_len;
        while !out.is_char_boundary(end) {
            end -= 1;
        }
        out.truncate(end);
        // Truncation can expose trailing dots or spaces again.
        let kept = out.trim_end().trim_end_matches('.').len();
        out.truncate(kept);
        if out.is_empty() {
            out.push(REPLACEMENT);
        }
    }
    out
}

/// Where one dump run puts its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    dump_name: String,
}

impl OutputLayout {
    /// `dir` is used as given when absolute, otherwise resolved against the
    /// current working directory.
    pub fn new<P: AsRef<Path>>(dir: P, dump_name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let root = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };
        Ok(Self {
            root,
            dump_name: dump_name.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dump_dir(&self) -> PathBuf {
        self.root.join(sanitize_file_name(&self.dump_name))
    }

    pub fn channel_path(&self, channel: &Channel) -> PathBuf {
        let folder = match &channel.guild {
            Some(guild) => sanitize_file_name(&guild.name),
            None => DIRECT_MESSAGES_DIR.to_string(),
        };
        self.dump_dir()
            .join(folder)
            .join(channel_file_name(&channel.name))
    }
}

/// Create the parent directory of `path`, and any missing ancestors.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
