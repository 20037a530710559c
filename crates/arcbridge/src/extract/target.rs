use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Turn a raw archive entry path into a relative host path.
///
/// Both separators are accepted. Drive letters and UNC or device prefixes
/// are dropped, `.` is ignored and `..` pops a component without ever
/// leaving the root. Characters the host cannot store are replaced by `_`.
pub fn sanitize_entry_path(raw: &str) -> Result<PathBuf> {
    if raw.contains('\0') {
        return Err(Error::InvalidPath);
    }

    let mut parts: Vec<&str> = raw.split(['/', '\\']).filter(|p| !p.is_empty()).collect();

    let unc = raw.starts_with("\\\\") || raw.starts_with("//");
    if unc {
        let device = matches!(parts.first(), Some(&"?") | Some(&"."));
        let skip = if device { 1 } else { 2 };
        parts.drain(..skip.min(parts.len()));
    }
    if parts.first().is_some_and(|p| is_drive(p)) {
        parts.remove(0);
    }

    let mut clean: Vec<String> = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            "." => {}
            ".." => {
                clean.pop();
            }
            _ => clean.push(replace_illegal(part)),
        }
    }

    if clean.is_empty() {
        return Err(Error::InvalidPath);
    }
    Ok(clean.iter().collect())
}

fn is_drive(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn replace_illegal(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Sanitize `raw` and join it onto `dest`, refusing anything that escapes.
pub fn resolve_target(dest: &Path, raw: &str) -> Result<PathBuf> {
    let relative = sanitize_entry_path(raw)?;
    let resolved = dest.join(&relative);
    if !resolved.starts_with(dest) {
        return Err(Error::PathEscape {
            entry: relative,
            resolved,
        });
    }
    Ok(resolved)
}

/// Name for an item whose stored path is empty.
///
/// The only item of an archive takes the archive's name without its last
/// extension, with `.tar` appended unless the result already ends in
/// `.tar`: `data.gz` and `data.tgz` yield `data.tar`, `data.tar.xz` yields
/// `data.tar`. Anything else is numbered.
pub fn synthesize_name(archive_name: Option<&str>, item_count: u32, index: u32) -> String {
    let fallback = || format!("[no name] {index}");
    if item_count != 1 {
        return fallback();
    }
    let Some(file_name) = archive_name
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .filter(|n| !n.is_empty())
    else {
        return fallback();
    };

    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };

    if stem.to_ascii_lowercase().ends_with(".tar") {
        stem.to_owned()
    } else {
        format!("{stem}.tar")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> &'static Path {
        if cfg!(windows) {
            Path::new("C:/out")
        } else {
            Path::new("/out")
        }
    }

    #[test]
    fn plain_relative_path() {
        assert_eq!(sanitize_entry_path("docs/readme.md").unwrap(), Path::new("docs/readme.md"));
        assert_eq!(sanitize_entry_path("docs\\sub\\a.txt").unwrap(), Path::new("docs/sub/a.txt"));
    }

    #[test]
    fn parent_components_cannot_escape() {
        assert_eq!(sanitize_entry_path("../../etc/passwd").unwrap(), Path::new("etc/passwd"));
        assert_eq!(sanitize_entry_path("a/../b").unwrap(), Path::new("b"));
        let resolved = resolve_target(base(), "../../../x").unwrap();
        assert!(resolved.starts_with(base()));
    }

    #[test]
    fn prefixes_collapse() {
        assert_eq!(
            sanitize_entry_path("C:\\Windows\\win.ini").unwrap(),
            Path::new("Windows/win.ini")
        );
        assert_eq!(sanitize_entry_path("\\\\server\\share\\f.txt").unwrap(), Path::new("f.txt"));
        assert_eq!(sanitize_entry_path("\\\\?\\D:\\f.txt").unwrap(), Path::new("f.txt"));
        assert_eq!(sanitize_entry_path("/abs/path").unwrap(), Path::new("abs/path"));
    }

    #[test]
    fn illegal_characters_replaced() {
        assert_eq!(sanitize_entry_path("a<b>:c?.txt").unwrap(), Path::new("a_b__c_.txt"));
        assert_eq!(sanitize_entry_path("tab\there").unwrap(), Path::new("tab_here"));
    }

    #[test]
    fn unusable_paths_rejected() {
        assert!(matches!(sanitize_entry_path("a\0b"), Err(Error::InvalidPath)));
        assert!(matches!(sanitize_entry_path(".."), Err(Error::InvalidPath)));
        assert!(matches!(sanitize_entry_path(""), Err(Error::InvalidPath)));
    }

    #[test]
    fn single_item_names() {
        assert_eq!(synthesize_name(Some("data.tgz"), 1, 0), "data.tar");
        assert_eq!(synthesize_name(Some("data.tar.tzst"), 1, 0), "data.tar");
        assert_eq!(synthesize_name(Some("dir/notes.txt.gz"), 1, 0), "notes.txt.tar");
        assert_eq!(synthesize_name(Some("blob"), 1, 0), "blob.tar");
        assert_eq!(synthesize_name(Some("Backup.TAR.XZ"), 1, 0), "Backup.TAR");
    }

    #[test]
    fn single_stream_formats_become_tarballs() {
        assert_eq!(synthesize_name(Some("data.gz"), 1, 0), "data.tar");
        assert_eq!(synthesize_name(Some("blob.xz"), 1, 0), "blob.tar");
        assert_eq!(synthesize_name(Some("data.tar.gz"), 1, 0), "data.tar");
    }

    #[test]
    fn numbered_fallback() {
        assert_eq!(synthesize_name(Some("data.tgz"), 3, 2), "[no name] 2");
        assert_eq!(synthesize_name(None, 1, 0), "[no name] 0");
    }
}
