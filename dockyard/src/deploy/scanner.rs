//! Dockerfile discovery.
//!
//! Walks a project tree and returns one build unit per `Dockerfile`. The walk
//! is best-effort: ignored, unreadable or too-deep directories are skipped
//! silently and never fail the scan.

use std::collections::HashSet;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Name of the build recipe file
pub const RECIPE_FILE: &str = "Dockerfile";

/// Default recursion depth below the project root
pub const DEFAULT_SCAN_DEPTH: usize = 2;

/// Port used when nothing in the recipe hints at one
pub const DEFAULT_INTERNAL_PORT: u16 = 3000;

/// Directories never descended into
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".github",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    "dist",
    "build",
    ".cache",
];

/// Ordered keyword heuristics: first match wins
const PORT_HEURISTICS: &[(&[&str], u16)] = &[
    (&["next", "react"], 3000),
    (&["uvicorn", "fastapi"], 8000),
    (&["flask"], 5000),
    (&["django"], 8000),
    (&["express", "node"], 3000),
];

/// A buildable unit found in the project tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildUnit {
    /// Service name derived from the directory (`app` for the root)
    pub name: String,
    /// Recipe path relative to the project root
    pub dockerfile_path: String,
    /// Build context relative to the project root (`.` for the root)
    pub context_path: String,
    /// Port the container listens on
    pub internal_port: u16,
}

/// Scan `root` for Dockerfiles up to `max_depth` directories deep
pub fn scan_dockerfiles(root: &Path, max_depth: usize) -> Vec<BuildUnit> {
    let mut units = Vec::new();
    let mut taken = HashSet::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth + 1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry));

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() || entry.file_name() != RECIPE_FILE {
            continue;
        }

        let Ok(recipe_rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let context_rel = recipe_rel.parent().unwrap_or_else(|| Path::new(""));

        let content = match std::fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(e) => {
                debug!("Skipping unreadable recipe {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let name = unique_name(unit_name(context_rel), &mut taken);
        let context_path = if context_rel.as_os_str().is_empty() {
            ".".to_string()
        } else {
            join_components(context_rel, "/")
        };

        units.push(BuildUnit {
            name,
            dockerfile_path: join_components(recipe_rel, "/"),
            context_path,
            internal_port: infer_port(&content),
        });
    }

    debug!("Scanned {}: {} build unit(s)", root.display(), units.len());
    units
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn unit_name(context_rel: &Path) -> String {
    if context_rel.as_os_str().is_empty() {
        "app".to_string()
    } else {
        join_components(context_rel, "-")
    }
}

fn join_components(path: &Path, sep: &str) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(sep)
}

/// `a/b` and `a-b` both map to `a-b`; later ones get a numeric suffix.
fn unique_name(base: String, taken: &mut HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

/// Infer the container port from recipe text.
///
/// The first `EXPOSE` directive wins; otherwise keyword heuristics apply, and
/// [`DEFAULT_INTERNAL_PORT`] is the fallback.
pub fn infer_port(recipe: &str) -> u16 {
    if let Some(port) = exposed_port(recipe) {
        return port;
    }

    let lower = recipe.to_lowercase();
    PORT_HEURISTICS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(_, port)| *port)
        .unwrap_or(DEFAULT_INTERNAL_PORT)
}

fn exposed_port(recipe: &str) -> Option<u16> {
    recipe.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        let directive = words.next()?;
        if !directive.eq_ignore_ascii_case("EXPOSE") {
            return None;
        }
        let first = words.next()?;
        let digits: String = first.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u16>().ok().filter(|p| *p > 0)
    })
}

/// Build-time variable keys that have no matching `ARG` instruction in the recipe
pub fn missing_build_args(recipe: &str, keys: &[String]) -> Vec<String> {
    let declared: HashSet<String> = recipe
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let directive = words.next()?;
            if !directive.eq_ignore_ascii_case("ARG") {
                return None;
            }
            let decl = words.next()?;
            Some(decl.split('=').next().unwrap_or(decl).to_string())
        })
        .collect();

    keys.iter()
        .filter(|k| !declared.contains(k.as_str()))
        .cloned()
        .collect()
}
