use std::path::PathBuf;

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

/// Expands configured log sources: a file stands for itself, a directory for
/// its immediate children (optionally filtered by `glob`, matched against the
/// file name, case-insensitive). Order is deterministic.
pub fn expand_sources(sources: &[String], glob: Option<&str>) -> Result<Vec<PathBuf>> {
    let set = build_glob(glob)?;
    let mut out: Vec<PathBuf> = Vec::new();
    for src in sources {
        let p = PathBuf::from(src);
        if p.is_dir() {
            let mut children: Vec<PathBuf> = WalkDir::new(&p)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .map(|de| de.into_path())
                .filter(|c| c.is_file())
                .filter(|c| match (&set, c.file_name()) {
                    (Some(s), Some(name)) => s.is_match(name),
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .collect();
            children.sort();
            out.extend(children);
        } else {
            // Missing files pass through so the adapter's failure policy can
            // turn them into a no_data report instead of aborting here.
            out.push(p);
        }
    }
    Ok(out)
}

fn build_glob(glob: Option<&str>) -> Result<Option<GlobSet>> {
    let Some(g) = glob else { return Ok(None) };
    let mut gb = GlobSetBuilder::new();
    gb.add(
        GlobBuilder::new(g)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid log glob {}", g))?,
    );
    Ok(Some(gb.build().context("building log glob set")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("web1.dpkg.log"), "").unwrap();
        std::fs::write(dir.join("web2.dpkg.log"), "").unwrap();
        std::fs::write(dir.join("notes.txt"), "").unwrap();
        std::fs::write(dir.join("nested").join("web3.dpkg.log"), "").unwrap();
        dir
    }

    #[test]
    fn directory_expands_to_immediate_children_only() {
        let dir = setup_dir("dpkgfleet_sources_all");
        let out = expand_sources(&[dir.to_string_lossy().into_owned()], None).unwrap();
        let names: Vec<String> =
            out.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["notes.txt", "web1.dpkg.log", "web2.dpkg.log"]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn glob_filters_directory_entries() {
        let dir = setup_dir("dpkgfleet_sources_glob");
        let out = expand_sources(&[dir.to_string_lossy().into_owned()], Some("*.dpkg.log")).unwrap();
        let names: Vec<String> =
            out.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["web1.dpkg.log", "web2.dpkg.log"]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn plain_file_passes_through_even_when_missing() {
        let out = expand_sources(&["/nonexistent/dpkg.log".to_string()], None).unwrap();
        assert_eq!(out, vec![PathBuf::from("/nonexistent/dpkg.log")]);
    }

    #[test]
    fn invalid_glob_is_an_error() {
        assert!(expand_sources(&[], Some("[")).is_err());
    }
}
