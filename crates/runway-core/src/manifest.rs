//! The platform manifest: one `platform=url` line per downloadable runtime.
//!
//! A line of the form `platform.sha256=<hex>` pins the archive's digest.

const CHECKSUM_SUFFIX: &str = ".sha256";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<(String, String)>,
}

impl Manifest {
    #[must_use]
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = lines
            .into_iter()
            .filter_map(|line| {
                let line = line.as_ref().trim_end();
                if line.starts_with('#') {
                    return None;
                }
                let (key, value) = line.split_once('=')?;
                Some((key.to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Archive URL for `platform`; the first mapping wins.
    #[must_use]
    pub fn archive_for(&self, platform: &str) -> Option<&str> {
        self.lookup(platform).filter(|url| !url.is_empty())
    }

    #[must_use]
    pub fn checksum_for(&self, platform: &str) -> Option<&str> {
        self.lookup(&format!("{platform}{CHECKSUM_SUFFIX}"))
            .map(str::trim)
            .filter(|digest| !digest.is_empty())
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| !key.ends_with(CHECKSUM_SUFFIX))
    }
}

/// File suffix of the archive behind `url`, keeping a `.tar` in front of the
/// compression extension (`.tar.gz`, `.zip`).
#[must_use]
pub fn archive_suffix(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.ends_with(".tar") {
        Some(format!(".tar.{ext}"))
    } else {
        Some(format!(".{ext}"))
    }
}
