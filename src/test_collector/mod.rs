use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use tracing::{error, info, instrument, warn};

use crate::{error::HarnessError, test_case::TestCase};

mod definition_file;

/// A test case and where it was loaded from (`path` or `path:line`).
#[derive(Debug, Clone)]
pub struct SuiteCase {
    pub origin: String,
    pub case: TestCase,
}

/// The cases of one file, in file order.
#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub cases: Vec<SuiteCase>,
}

impl Suite {
    pub fn needs_engine(&self) -> bool {
        self.cases.iter().any(|c| c.case.needs_engine())
    }
}

/// Everything found under the collected paths.
#[derive(Debug, Default)]
pub struct Collection {
    pub suites: Vec<Suite>,
    /// Records that could not be loaded. They are skipped, not run.
    pub malformed: Vec<HarnessError>,
}

impl Collection {
    pub fn needs_engine(&self) -> bool {
        self.suites.iter().any(Suite::needs_engine)
    }

    pub fn case_count(&self) -> usize {
        self.suites.iter().map(|s| s.cases.len()).sum()
    }
}

/// Loads every `.epd` and `.json` file under `paths`.
///
/// Directories are walked recursively and their files loaded in path order. A file given
/// explicitly is loaded whatever its extension, as JSON unless it ends in `.epd`.
#[instrument(skip_all)]
pub fn collect_suites(paths: &[PathBuf], verbose: bool) -> anyhow::Result<Collection> {
    const RED: &str = "\x1b[31m";
    const GREEN: &str = "\x1b[32m";
    const RESET: &str = "\x1b[0m";

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk(path, &mut files).with_context(|| format!("cannot read '{}'", path.display()))?;
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("'{}' is not a file or directory", path.display());
        }
    }
    info!(?files);

    if verbose {
        println!("Collecting suites...");
    }

    let mut collection = Collection::default();
    for file in files {
        if verbose {
            print!("Loading {} ", file.display());
            let _ = std::io::stdout().flush();
        }

        let (suite, malformed) = load_file(&file)?;
        if verbose {
            if malformed.is_empty() {
                println!("{GREEN}{} cases{RESET}", suite.cases.len());
            } else {
                println!(
                    "{GREEN}{} cases{RESET}, {RED}{} malformed{RESET}",
                    suite.cases.len(),
                    malformed.len()
                );
            }
        }
        for e in &malformed {
            warn!("{e}");
        }

        collection.malformed.extend(malformed);
        if !suite.cases.is_empty() {
            collection.suites.push(suite);
        }
    }

    Ok(collection)
}

/// Loads a single suite file.
///
/// Only I/O failures are errors. Bad records are returned next to the suite.
pub fn load_file(path: &Path) -> anyhow::Result<(Suite, Vec<HarnessError>)> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read '{}'", path.display()))?;
    let name = path.display().to_string();

    let (cases, malformed) = if has_extension(path, "epd") {
        definition_file::parse_epd(&name, &text)
    } else {
        match definition_file::parse_definition(&name, &text) {
            Ok(cases) => (cases, vec![]),
            Err(e) => {
                error!("{e}");
                (vec![], vec![e])
            }
        }
    };

    Ok((Suite { name, cases }, malformed))
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            walk(&path, files)?;
        } else if has_extension(&path, "epd") || has_extension(&path, "json") {
            files.push(path);
        }
    }
    Ok(())
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
