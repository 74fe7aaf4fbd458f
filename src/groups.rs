//! Keyword-based assignment of tracks to named groups.
//!
//! Each entry of the `group` list is `Name=pattern,pattern,...` or a bare
//! pattern list, which gets the name `G<n>` after its position. A pattern
//! matches case-insensitively: with `*` or `?` it is a glob over the whole
//! filename, with a trailing `$` it must equal the filename or its stem, and
//! otherwise it is a substring.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::ConfigError;
use crate::models::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub patterns: Vec<String>,
}

impl GroupSpec {
    /// Parse one entry; `position` is zero-based and only used for unnamed groups.
    pub fn parse(entry: &str, position: usize) -> Option<Self> {
        let (name, patterns) = match entry.split_once('=') {
            Some((name, rest)) if !name.trim().is_empty() => (name.trim().to_string(), rest),
            Some((_, rest)) => (format!("G{}", position + 1), rest),
            None => (format!("G{}", position + 1), entry),
        };
        let patterns: Vec<String> = patterns
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if patterns.is_empty() {
            return None;
        }
        Some(Self { name, patterns })
    }

    pub fn matches(&self, filename: &str) -> bool {
        let name = filename.to_lowercase();
        self.patterns.iter().any(|p| pattern_matches(p, &name))
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(exact) = pattern.strip_suffix('$') {
        let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
        return name == exact || stem == exact;
    }
    if pattern.contains(['*', '?']) {
        return glob(pattern.as_bytes(), name.as_bytes());
    }
    name.contains(pattern)
}

/// Iterative wildcard match with single-star backtracking.
fn glob(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// First declared group wins; a warning is recorded.
    Warn,
    /// Abort with `ConfigError::GroupOverlap`.
    Error,
    /// Overlapping groups are merged into the first declared one.
    Merge,
}

impl OverlapPolicy {
    pub fn from_config(config: &Config) -> Self {
        match config.str_or("group_overlap", "warn") {
            "error" => OverlapPolicy::Error,
            "merge" => OverlapPolicy::Merge,
            _ => OverlapPolicy::Warn,
        }
    }
}

pub fn parse_groups(config: &Config) -> Vec<GroupSpec> {
    config
        .list("group")
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| GroupSpec::parse(entry, i))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAssignment {
    /// Filename to group name.
    pub groups: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Assign every filename to at most one group.
pub fn assign_groups<'a>(
    filenames: impl IntoIterator<Item = &'a str>,
    specs: &[GroupSpec],
    policy: OverlapPolicy,
) -> Result<GroupAssignment, ConfigError> {
    let filenames: Vec<&str> = filenames.into_iter().collect();
    let hits: Vec<Vec<usize>> = filenames
        .iter()
        .map(|f| (0..specs.len()).filter(|&g| specs[g].matches(f)).collect())
        .collect();

    // Union-find over group indices; the root is always the smallest index.
    let mut parent: Vec<usize> = (0..specs.len()).collect();
    fn find(parent: &mut [usize], mut g: usize) -> usize {
        while parent[g] != g {
            parent[g] = parent[parent[g]];
            g = parent[g];
        }
        g
    }

    let mut assignment = GroupAssignment::default();
    for (filename, groups) in filenames.iter().zip(&hits) {
        if groups.len() < 2 {
            continue;
        }
        let names: Vec<String> = groups.iter().map(|&g| specs[g].name.clone()).collect();
        match policy {
            OverlapPolicy::Error => {
                return Err(ConfigError::GroupOverlap {
                    filename: filename.to_string(),
                    groups: names,
                })
            }
            OverlapPolicy::Warn => {
                let warning = format!(
                    "'{}' matches groups {}; using '{}'",
                    filename,
                    names.join(", "),
                    names[0]
                );
                tracing::warn!("{}", warning);
                assignment.warnings.push(warning);
            }
            OverlapPolicy::Merge => {
                for &g in &groups[1..] {
                    let (a, b) = (find(&mut parent, groups[0]), find(&mut parent, g));
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    for (filename, groups) in filenames.iter().zip(&hits) {
        if let Some(&first) = groups.first() {
            let g = if policy == OverlapPolicy::Merge { find(&mut parent, first) } else { first };
            assignment.groups.insert(filename.to_string(), specs[g].name.clone());
        }
    }
    Ok(assignment)
}

/// Assign groups to every track of `session` from its configuration.
pub fn apply_groups(session: &mut Session) -> Result<(), ConfigError> {
    let specs = parse_groups(&session.config);
    let policy = OverlapPolicy::from_config(&session.config);
    let assignment = assign_groups(session.tracks.iter().map(|t| t.filename.as_str()), &specs, policy)?;
    for track in &mut session.tracks {
        track.group = assignment.groups.get(&track.filename).cloned();
    }
    session.groups = assignment.groups;
    session.warnings.extend(assignment.warnings);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(entries: &[&str]) -> Vec<GroupSpec> {
        entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| GroupSpec::parse(e, i))
            .collect()
    }

    #[test]
    fn test_parse_named_and_numbered() {
        let parsed = specs(&["Drums=Kick, snare*", "bass", "Empty="]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "Drums");
        assert_eq!(parsed[0].patterns, vec!["kick", "snare*"]);
        assert_eq!(parsed[1].name, "G2");
    }

    #[test]
    fn test_pattern_kinds() {
        let spec = GroupSpec::parse("X=kick,tom?_*.wav,oh$", 0).unwrap();
        assert!(spec.matches("Kick In.wav"));
        assert!(spec.matches("tom1_hi.wav"));
        assert!(!spec.matches("tom12_hi.wav"));
        assert!(spec.matches("OH.wav"));
        assert!(!spec.matches("OH L.wav"));
    }

    #[test]
    fn test_exact_pattern_matches_full_name_or_stem() {
        let spec = GroupSpec::parse("X=kick.wav$,snare$", 0).unwrap();
        assert!(spec.matches("Kick.wav"));
        assert!(!spec.matches("kick.flac"));
        assert!(spec.matches("snare.wav"));
        assert!(spec.matches("Snare.flac"));
        assert!(spec.matches("snare"));
        assert!(!spec.matches("snare top.wav"));
    }

    #[test]
    fn test_glob() {
        assert!(glob(b"*", b"anything"));
        assert!(glob(b"a*c", b"abbbc"));
        assert!(glob(b"*.wav", b"x.wav"));
        assert!(!glob(b"*.wav", b"x.flac"));
        assert!(glob(b"a?c", b"abc"));
        assert!(!glob(b"a?c", b"ac"));
    }

    #[test]
    fn test_overlap_warn_keeps_first() {
        let groups = specs(&["Drums=kick", "Low=kick,bass"]);
        let assignment = assign_groups(["kick.wav", "bass.wav"], &groups, OverlapPolicy::Warn).unwrap();
        assert_eq!(assignment.groups["kick.wav"], "Drums");
        assert_eq!(assignment.groups["bass.wav"], "Low");
        assert_eq!(assignment.warnings.len(), 1);
    }

    #[test]
    fn test_overlap_error() {
        let groups = specs(&["Drums=kick", "Low=kick"]);
        let err = assign_groups(["kick.wav"], &groups, OverlapPolicy::Error).unwrap_err();
        assert!(matches!(err, ConfigError::GroupOverlap { .. }));
    }

    #[test]
    fn test_overlap_merge_is_transitive() {
        let groups = specs(&["A=kick", "B=snare", "C=kicksnare,bass"]);
        let files = ["kicksnare.wav", "bass.wav", "snare.wav", "kick.wav"];
        let assignment = assign_groups(files, &groups, OverlapPolicy::Merge).unwrap();
        for f in files {
            assert_eq!(assignment.groups[f], "A", "{}", f);
        }
    }

    #[test]
    fn test_unmatched_tracks_have_no_group() {
        let groups = specs(&["Drums=kick"]);
        let assignment = assign_groups(["vox.wav"], &groups, OverlapPolicy::Warn).unwrap();
        assert!(assignment.groups.is_empty());
    }
}
