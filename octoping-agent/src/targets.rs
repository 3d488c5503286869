//! Target list loading
//!
//! The list is rebuilt on every cycle from all configured sources, then
//! filtered. Filters only see the fully concatenated list.

use anyhow::{Context, Result};
use octoping_common::{Target, TargetList};
use std::path::{Path, PathBuf};

/// Produces targets for one cycle.
pub trait TargetSource: Send + Sync {
    fn load(&self) -> Result<TargetList>;
}

impl<F> TargetSource for F
where
    F: Fn() -> Result<TargetList> + Send + Sync,
{
    fn load(&self) -> Result<TargetList> {
        self()
    }
}

/// Reads targets from a file, one per line. Commas also separate entries.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TargetSource for FileSource {
    fn load(&self) -> Result<TargetList> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read targets from {}", self.path.display()))?;
        Ok(parse_targets(&content))
    }
}

/// A fixed list of targets
#[derive(Debug, Clone, Default)]
pub struct StaticSource(TargetList);

impl StaticSource {
    pub fn new<I, T>(targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Target>,
    {
        Self(targets.into_iter().map(Into::into).collect())
    }
}

impl TargetSource for StaticSource {
    fn load(&self) -> Result<TargetList> {
        Ok(self.0.clone())
    }
}

/// Split `content` on newlines and commas, dropping blanks.
pub fn parse_targets(content: &str) -> TargetList {
    content
        .lines()
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(Target::from)
        .collect()
}

/// Returns `true` for targets that should be removed.
pub type TargetFilter = Box<dyn Fn(&Target) -> bool + Send + Sync>;

/// Filter removing `addr`. An empty address (e.g. an unset pod IP) yields
/// no filter.
pub fn exclude(addr: &str) -> Option<TargetFilter> {
    let addr = addr.trim().to_string();
    if addr.is_empty() {
        return None;
    }
    Some(Box::new(move |target: &Target| target.as_str() == addr))
}

/// Filter removing every address in `addrs`.
pub fn exclude_any<I, S>(addrs: I) -> Option<TargetFilter>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let addrs: Vec<String> = addrs
        .into_iter()
        .map(|a| a.as_ref().trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if addrs.is_empty() {
        return None;
    }
    Some(Box::new(move |target: &Target| {
        addrs.iter().any(|a| target.as_str() == a)
    }))
}

#[derive(Default)]
pub struct TargetLoader {
    sources: Vec<Box<dyn TargetSource>>,
    filters: Vec<TargetFilter>,
}

impl TargetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl TargetSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Adds a filter. Accepts the `Option` returned by [`exclude`] so
    /// that unset addresses fall through.
    pub fn with_filter(mut self, filter: impl Into<Option<TargetFilter>>) -> Self {
        if let Some(filter) = filter.into() {
            self.filters.push(filter);
        }
        self
    }

    pub fn with_filter_fn<F>(self, filter: F) -> Self
    where
        F: Fn(&Target) -> bool + Send + Sync + 'static,
    {
        self.with_filter(Some(Box::new(filter) as TargetFilter))
    }

    /// Concatenate every source, then drop targets matched by any filter.
    pub fn load(&self) -> Result<TargetList> {
        let mut targets = TargetList::new();
        for source in &self.sources {
            targets.extend(source.load()?);
        }

        targets.retain(|target| !self.filters.iter().any(|matches| matches(target)));
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets("10.0.0.1\n\n  10.0.0.2 ,10.0.0.3\n,\n node-a \n");
        assert_eq!(targets, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3", "node-a"]);
    }

    #[test]
    fn test_file_source() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "10.0.0.1").unwrap();
        writeln!(file, "10.0.0.2").unwrap();

        let targets = FileSource::new(file.path()).load().unwrap();
        assert_eq!(targets, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::new(dir.path().join("nodes")).load().unwrap_err();
        assert!(err.to_string().contains("Failed to read targets"));
    }

    #[test]
    fn test_filters_apply_after_concatenation() {
        let loader = TargetLoader::new()
            .with_source(StaticSource::new(["10.0.0.1", "10.0.0.2"]))
            .with_source(StaticSource::new(["10.0.0.3", "10.0.0.1"]))
            .with_filter(exclude("10.0.0.1"));

        assert_eq!(loader.load().unwrap(), vec!["10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_empty_exclusion_is_ignored() {
        assert!(exclude("").is_none());
        assert!(exclude("  ").is_none());
        assert!(exclude_any(["", " "]).is_none());

        let loader = TargetLoader::new()
            .with_source(StaticSource::new(["10.0.0.1"]))
            .with_filter(exclude(""));
        assert_eq!(loader.load().unwrap(), vec!["10.0.0.1"]);
    }

    #[test]
    fn test_any_filter_removes() {
        let loader = TargetLoader::new()
            .with_source(StaticSource::new(["a", "b", "c", "d"]))
            .with_filter(exclude_any(["a", "c"]))
            .with_filter_fn(|t| t.as_str() == "d");

        assert_eq!(loader.load().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_closure_source_and_error_propagation() {
        let ok = TargetLoader::new().with_source(|| -> Result<TargetList> { Ok(vec![Target::from("x")]) });
        assert_eq!(ok.load().unwrap(), vec!["x"]);

        let failing = TargetLoader::new()
            .with_source(StaticSource::new(["x"]))
            .with_source(|| -> Result<TargetList> { Err(anyhow!("source down")) });
        assert_eq!(failing.load().unwrap_err().to_string(), "source down");
    }

    #[test]
    fn test_reload_sees_file_changes() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "10.0.0.1").unwrap();
        let loader = TargetLoader::new().with_source(FileSource::new(file.path()));
        assert_eq!(loader.load().unwrap().len(), 1);

        writeln!(file, "10.0.0.2").unwrap();
        assert_eq!(loader.load().unwrap().len(), 2);
    }
}
