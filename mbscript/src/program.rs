//! Program generation from device script sources.

use crate::error::ScriptResult;
use mbscript_common::consts::IMPORT_PATH_SEPARATOR;
use mbscript_shared_memory::naming::escape_component;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const INIT_MARKER: &str = "<%init%>";
const LOOP_MARKER: &str = "<%loop%>";
const FINAL_MARKER: &str = "<%final%>";
const LOOP_INDENT: &str = "    ";

/// The three user script sections of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSources {
    /// Runs once before the loop.
    pub init: String,
    /// Body of the loop, run while the session is active.
    pub loop_body: String,
    /// Runs once after the loop ends.
    pub finalize: String,
}

impl ProgramSources {
    /// `true` if every section is blank.
    pub fn is_empty(&self) -> bool {
        [&self.init, &self.loop_body, &self.finalize]
            .iter()
            .all(|s| s.trim().is_empty())
    }
}

/// Where a session gets its script from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSources {
    /// Ready-made script file passed to the interpreter as is.
    File(PathBuf),
    /// Sections rendered into a program before spawning.
    Program(ProgramSources),
}

impl ScriptSources {
    /// `true` if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::File(path) => path.as_os_str().is_empty(),
            Self::Program(sources) => sources.is_empty(),
        }
    }
}

/// Program text with init/loop/final markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramTemplate {
    text: String,
}

impl Default for ProgramTemplate {
    fn default() -> Self {
        Self {
            text: include_str!("../resources/program.py").to_string(),
        }
    }
}

impl ProgramTemplate {
    /// Template from literal text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Template read from a file.
    pub fn from_file(path: &Path) -> ScriptResult<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }

    /// Substitute the markers with `sources`.
    ///
    /// Init and final are inserted verbatim. Loop lines are indented one
    /// level and blank lines are dropped so the loop body stays valid.
    pub fn render(&self, sources: &ProgramSources) -> String {
        self.text
            .replace(INIT_MARKER, &sources.init)
            .replace(LOOP_MARKER, &indent_loop(&sources.loop_body))
            .replace(FINAL_MARKER, &sources.finalize)
    }

    /// Render and write the program for `device` on `port` into `runtime_dir`.
    pub fn write_program(
        &self,
        runtime_dir: &Path,
        port: &str,
        device: &str,
        sources: &ProgramSources,
    ) -> ScriptResult<PathBuf> {
        std::fs::create_dir_all(runtime_dir)?;
        let path = runtime_dir.join(format!(
            "{}.{}.program.py",
            escape_component(port),
            escape_component(device)
        ));
        std::fs::write(&path, self.render(sources))?;
        Ok(path)
    }
}

fn indent_loop(body: &str) -> String {
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| format!("{LOOP_INDENT}{line}\n"))
        .collect()
}

/// Join `roots` then `extras` into the child's import path.
///
/// Order is kept, empty entries are dropped and only the first occurrence
/// of a duplicate survives.
pub fn compose_import_path(roots: &[PathBuf], extras: &[PathBuf]) -> String {
    let mut seen = HashSet::new();
    roots
        .iter()
        .chain(extras)
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .filter(|p| seen.insert(p.clone()))
        .collect::<Vec<_>>()
        .join(&IMPORT_PATH_SEPARATOR.to_string())
}
