//! Observation scripts for the interferometer simulator.
//!
//! A script is a sequence of `simobserve(...)`, `tclean(...)` and
//! `exportfits(...)` calls, one group per Stokes component. Fields come from
//! an ordered table keyed by (task, name); the reader tokenizes calls and
//! keyword arguments, so one field name never matches inside another.
use crate::error::PipelineError;
use crate::util::write_atomic;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

const SPEED_OF_LIGHT_CM_S: f64 = 2.997_924_58e10;

/// Replaced by the Stokes component of each call group.
pub const STOKES_PLACEHOLDER: &str = "{stokes}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Task {
    Simobserve,
    Tclean,
    Exportfits,
}

impl Task {
    pub const ALL: [Task; 3] = [Task::Simobserve, Task::Tclean, Task::Exportfits];

    pub fn as_str(self) -> &'static str {
        match self {
            Task::Simobserve => "simobserve",
            Task::Tclean => "tclean",
            Task::Exportfits => "exportfits",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Task::ALL.into_iter().find(|task| task.as_str() == name)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a field value is spelled in the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Quoted string.
    Text,
    /// Number, boolean or list, written verbatim.
    Literal,
}

pub struct FieldSpec {
    pub task: Task,
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn text(task: Task, name: &'static str) -> FieldSpec {
    FieldSpec {
        task,
        name,
        kind: FieldKind::Text,
    }
}

const fn literal(task: Task, name: &'static str) -> FieldSpec {
    FieldSpec {
        task,
        name,
        kind: FieldKind::Literal,
    }
}

/// Every known field in the order it is written.
pub const FIELDS: &[FieldSpec] = &[
    text(Task::Simobserve, "project"),
    text(Task::Simobserve, "skymodel"),
    text(Task::Simobserve, "inbright"),
    text(Task::Simobserve, "incell"),
    text(Task::Simobserve, "incenter"),
    text(Task::Simobserve, "inwidth"),
    text(Task::Simobserve, "mapsize"),
    literal(Task::Simobserve, "setpointings"),
    text(Task::Simobserve, "indirection"),
    text(Task::Simobserve, "integration"),
    text(Task::Simobserve, "totaltime"),
    text(Task::Simobserve, "hourangle"),
    text(Task::Simobserve, "obsmode"),
    text(Task::Simobserve, "antennalist"),
    text(Task::Simobserve, "thermalnoise"),
    text(Task::Simobserve, "graphics"),
    literal(Task::Simobserve, "overwrite"),
    literal(Task::Simobserve, "verbose"),
    text(Task::Tclean, "vis"),
    text(Task::Tclean, "imagename"),
    literal(Task::Tclean, "imsize"),
    text(Task::Tclean, "cell"),
    text(Task::Tclean, "specmode"),
    text(Task::Tclean, "gridder"),
    text(Task::Tclean, "deconvolver"),
    literal(Task::Tclean, "scales"),
    text(Task::Tclean, "weighting"),
    literal(Task::Tclean, "robust"),
    literal(Task::Tclean, "niter"),
    text(Task::Tclean, "threshold"),
    text(Task::Tclean, "mask"),
    literal(Task::Tclean, "interactive"),
    literal(Task::Tclean, "verbose"),
    text(Task::Exportfits, "imagename"),
    text(Task::Exportfits, "fitsimage"),
    literal(Task::Exportfits, "dropstokes"),
    literal(Task::Exportfits, "overwrite"),
];

pub fn field_spec(task: Task, name: &str) -> Option<&'static FieldSpec> {
    FIELDS
        .iter()
        .find(|spec| spec.task == task && spec.name == name)
}

/// A script to be written: enabled tasks, Stokes groups and field values,
/// which may contain `{stokes}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationScript {
    pub stokes: Vec<String>,
    pub simobserve: bool,
    pub tclean: bool,
    pub exportfits: bool,
    values: BTreeMap<(Task, &'static str), String>,
}

impl ObservationScript {
    /// Minimal template observing at `lam_um` micron.
    pub fn template(lam_um: f64, polarization: bool) -> Self {
        let freq = SPEED_OF_LIGHT_CM_S / (lam_um * 1e-4);
        let stokes = if polarization {
            vec!["I", "Q", "U"]
        } else {
            vec!["I"]
        };
        let project = "synobs_data";
        let antennalist = "alma.cycle4.7.cfg";
        let mut script = Self {
            stokes: stokes.into_iter().map(String::from).collect(),
            simobserve: true,
            tclean: true,
            exportfits: true,
            values: BTreeMap::new(),
        };
        let defaults = [
            (Task::Simobserve, "project", project.to_string()),
            (Task::Simobserve, "skymodel", "radmc3d_{stokes}.fits".to_string()),
            (Task::Simobserve, "inbright", String::new()),
            (Task::Simobserve, "incell", String::new()),
            (Task::Simobserve, "incenter", format!("{freq}Hz")),
            (Task::Simobserve, "inwidth", "2GHz".to_string()),
            (Task::Simobserve, "mapsize", String::new()),
            (Task::Simobserve, "setpointings", "True".to_string()),
            (Task::Simobserve, "indirection", "J2000 16h32m22.63 -24d28m31.8".to_string()),
            (Task::Simobserve, "integration", "2s".to_string()),
            (Task::Simobserve, "totaltime", "1h".to_string()),
            (Task::Simobserve, "hourangle", "transit".to_string()),
            (Task::Simobserve, "obsmode", "int".to_string()),
            (Task::Simobserve, "antennalist", antennalist.to_string()),
            (Task::Simobserve, "thermalnoise", "tsys-atm".to_string()),
            (Task::Simobserve, "graphics", "both".to_string()),
            (Task::Simobserve, "overwrite", "True".to_string()),
            (Task::Simobserve, "verbose", "False".to_string()),
            (
                Task::Tclean,
                "vis",
                format!(
                    "{project}/{project}.{}.noisy.ms",
                    antennalist.trim_end_matches(".cfg")
                ),
            ),
            (Task::Tclean, "imagename", format!("{project}/clean_{{stokes}}")),
            (Task::Tclean, "imsize", "100".to_string()),
            (Task::Tclean, "cell", "0.008arcsec".to_string()),
            (Task::Tclean, "specmode", "mfs".to_string()),
            (Task::Tclean, "gridder", "standard".to_string()),
            (Task::Tclean, "deconvolver", "multiscale".to_string()),
            (Task::Tclean, "scales", "[1, 8, 24]".to_string()),
            (Task::Tclean, "weighting", "briggs".to_string()),
            (Task::Tclean, "robust", "0.5".to_string()),
            (Task::Tclean, "niter", "10000".to_string()),
            (Task::Tclean, "threshold", "5e-5Jy".to_string()),
            (Task::Tclean, "mask", String::new()),
            (Task::Tclean, "interactive", "False".to_string()),
            (Task::Tclean, "verbose", "False".to_string()),
            (
                Task::Exportfits,
                "imagename",
                format!("{project}/clean_{{stokes}}.image"),
            ),
            (Task::Exportfits, "fitsimage", "synobs_{stokes}.fits".to_string()),
            (Task::Exportfits, "dropstokes", "True".to_string()),
            (Task::Exportfits, "overwrite", "True".to_string()),
        ];
        for (task, name, value) in defaults {
            if let Some(spec) = field_spec(task, name) {
                script.values.insert((task, spec.name), value);
            }
        }
        script
    }

    pub fn get(&self, task: Task, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|((t, n), _)| *t == task && *n == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, task: Task, name: &str, value: impl Into<String>) -> Result<()> {
        let spec = field_spec(task, name).ok_or_else(|| {
            PipelineError::configuration(format!("unknown {task} field {name:?}"))
        })?;
        self.values.insert((task, spec.name), value.into());
        Ok(())
    }

    /// Apply a `task.field=value` override.
    pub fn apply_override(&mut self, assignment: &str) -> Result<()> {
        let malformed =
            || PipelineError::configuration(format!("expected TASK.FIELD=VALUE, got {assignment:?}"));
        let (key, value) = assignment.split_once('=').ok_or_else(malformed)?;
        let (task, name) = key.trim().split_once('.').ok_or_else(malformed)?;
        let task = Task::from_name(task)
            .ok_or_else(|| PipelineError::configuration(format!("unknown task {task:?}")))?;
        self.set(task, name, value.trim())
    }

    /// Image size for `npix` model pixels, padded by 20 on each axis.
    pub fn with_npix(mut self, npix: Option<u32>) -> Self {
        if let Some(npix) = npix {
            self.values
                .insert((Task::Tclean, "imsize"), (npix + 20).to_string());
        }
        self
    }

    pub fn with_totaltime_hours(mut self, hours: f64) -> Self {
        self.values
            .insert((Task::Simobserve, "totaltime"), format!("{hours}h"));
        self
    }

    fn enabled(&self, task: Task) -> bool {
        match task {
            Task::Simobserve => self.simobserve,
            Task::Tclean => self.tclean,
            Task::Exportfits => self.exportfits,
        }
    }

    /// Sky model files the simulator will read.
    pub fn sky_models(&self) -> Vec<String> {
        if !self.simobserve {
            return Vec::new();
        }
        let skymodel = self.get(Task::Simobserve, "skymodel").unwrap_or_default();
        self.stokes
            .iter()
            .map(|stokes| skymodel.replace(STOKES_PLACEHOLDER, stokes))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# Template script to simulate observations.\n");
        out.push_str("# Written by synthesizer.\n\n");
        for stokes in &self.stokes {
            out.push_str(&format!(
                "print(\"\\033[1m\\n[synobs] Observing Stokes {stokes} ...\\033[0m\\n\")\n"
            ));
            for task in Task::ALL {
                if !self.enabled(task) {
                    continue;
                }
                out.push_str(&format!("{task}(\n"));
                for spec in FIELDS.iter().filter(|spec| spec.task == task) {
                    let Some(value) = self.values.get(&(task, spec.name)) else {
                        continue;
                    };
                    let value = value.replace(STOKES_PLACEHOLDER, stokes);
                    let value = match spec.kind {
                        FieldKind::Text => quote(&value),
                        FieldKind::Literal => value,
                    };
                    out.push_str(&format!("    {} = {value},\n", spec.name));
                }
                out.push_str(")\n");
            }
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.render().as_bytes())
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// One keyword argument value as spelled in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Text(String),
    Literal(String),
}

impl ScriptValue {
    pub fn as_str(&self) -> &str {
        match self {
            ScriptValue::Text(value) | ScriptValue::Literal(value) => value,
        }
    }
}

/// One recognized task call and its keyword arguments in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCall {
    pub task: Task,
    pub args: Vec<(String, ScriptValue)>,
}

impl TaskCall {
    pub fn get(&self, name: &str) -> Option<&ScriptValue> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// An existing script read back into its task calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScript {
    pub calls: Vec<TaskCall>,
    /// Stokes components announced by the script, in order.
    pub stokes: Vec<String>,
}

impl ParsedScript {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::missing("observation script", path).into());
        }
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut calls = Vec::new();
        let mut stokes = Vec::new();
        let announce = Regex::new(r"Observing Stokes (\w+)").context("compile stokes pattern")?;
        for call in Scanner::new(text).calls()? {
            match Task::from_name(&call.name) {
                Some(task) => calls.push(TaskCall {
                    task,
                    args: call.keywords,
                }),
                None => {
                    for value in &call.positional {
                        if let Some(found) = announce.captures(value.as_str()) {
                            stokes.push(found[1].to_string());
                        }
                    }
                }
            }
        }
        if calls.is_empty() {
            return Err(anyhow!(
                "not an observation script: no simobserve, tclean or exportfits call"
            ));
        }
        Ok(Self { calls, stokes })
    }

    /// Value of the first occurrence of (task, name).
    pub fn get(&self, task: Task, name: &str) -> Option<&str> {
        self.calls
            .iter()
            .filter(|call| call.task == task)
            .find_map(|call| call.get(name))
            .map(ScriptValue::as_str)
    }

    /// Every value of (task, name), one per call group.
    pub fn all(&self, task: Task, name: &str) -> Vec<&str> {
        self.calls
            .iter()
            .filter(|call| call.task == task)
            .filter_map(|call| call.get(name))
            .map(ScriptValue::as_str)
            .collect()
    }

    pub fn sky_models(&self) -> Vec<String> {
        self.all(Task::Simobserve, "skymodel")
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Known fields with their first values, in field-table order.
    pub fn fields(&self) -> Vec<(Task, &'static str, &str)> {
        FIELDS
            .iter()
            .filter_map(|spec| {
                self.get(spec.task, spec.name)
                    .map(|value| (spec.task, spec.name, value))
            })
            .collect()
    }
}

struct RawCall {
    name: String,
    keywords: Vec<(String, ScriptValue)>,
    positional: Vec<ScriptValue>,
}

/// Tokenizer over call statements; `#` comment lines are dropped.
struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(text: &str) -> Self {
        let mut source = String::new();
        for line in text.lines() {
            if !line.trim_start().starts_with('#') {
                source.push_str(line);
            }
            source.push('\n');
        }
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.chars[start..self.pos].iter().collect())
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == '\n' {
                break;
            }
        }
    }

    fn calls(mut self) -> Result<Vec<RawCall>> {
        let mut calls = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek().is_none() {
                return Ok(calls);
            }
            let Some(name) = self.identifier() else {
                self.skip_line();
                continue;
            };
            self.skip_whitespace();
            if self.peek() != Some('(') {
                self.skip_line();
                continue;
            }
            self.pos += 1;
            calls.push(self.arguments(name)?);
        }
    }

    fn arguments(&mut self, name: String) -> Result<RawCall> {
        let mut call = RawCall {
            name,
            keywords: Vec::new(),
            positional: Vec::new(),
        };
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(anyhow!("unterminated call to {}", call.name)),
                Some(')') => {
                    self.pos += 1;
                    return Ok(call);
                }
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }
            let mark = self.pos;
            if let Some(key) = self.identifier() {
                self.skip_whitespace();
                if self.peek() == Some('=') && self.chars.get(self.pos + 1) != Some(&'=') {
                    self.pos += 1;
                    self.skip_whitespace();
                    let value = self.value(&call.name)?;
                    call.keywords.push((key, value));
                    continue;
                }
            }
            self.pos = mark;
            let value = self.value(&call.name)?;
            call.positional.push(value);
        }
    }

    /// A quoted string, or raw text up to a top-level `,` or `)`.
    fn value(&mut self, call: &str) -> Result<ScriptValue> {
        if let Some(quote) = self.peek().filter(|c| *c == '"' || *c == '\'') {
            self.pos += 1;
            let mut text = String::new();
            loop {
                match self.peek() {
                    None => return Err(anyhow!("unterminated string in {call}")),
                    Some('\\') => {
                        if let Some(next) = self.chars.get(self.pos + 1).copied() {
                            match next {
                                '"' | '\'' | '\\' => text.push(next),
                                other => {
                                    text.push('\\');
                                    text.push(other);
                                }
                            }
                            self.pos += 2;
                        } else {
                            self.pos += 1;
                        }
                    }
                    Some(c) if c == quote => {
                        self.pos += 1;
                        return Ok(ScriptValue::Text(text));
                    }
                    Some(c) => {
                        text.push(c);
                        self.pos += 1;
                    }
                }
            }
        }

        let start = self.pos;
        let mut depth = 0usize;
        let mut in_string: Option<char> = None;
        while let Some(c) = self.peek() {
            match (in_string, c) {
                (Some(q), c) if c == q => in_string = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => in_string = Some(c),
                (None, '[' | '(' | '{') => depth += 1,
                (None, ']' | '}') => depth = depth.saturating_sub(1),
                (None, ')') if depth == 0 => break,
                (None, ')') => depth -= 1,
                (None, ',') if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        Ok(ScriptValue::Literal(raw.trim().to_string()))
    }
}

#[cfg(test)]
#[path = "script_tests.rs"]
mod tests;
