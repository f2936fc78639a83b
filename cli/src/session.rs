use std::io::Write;
use std::path::Path;

use anyhow::{Context, anyhow, bail};
use tracing::debug;
use varpool_core::{
    config::PoolConfig,
    image::{Image, load_dictionary, save_dictionary},
    val::Val,
    var::{VariableDictionary, stem_key},
};

pub(crate) const HELP: &str = "\
Commands:
  set NAME VALUE     assign a simple or compound variable (STEM.T1.T2)
  get NAME           print a value, or <unset>
  drop NAME          drop a variable
  stem STEM. VALUE   assign a stem default, discarding its tails
  vars               list variables in slot order
  stats              show table statistics
  save FILE          write the session to an image
  load FILE          replace the session with an image";

/// A variable reference as written on a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Simple(String),
    Stem(String),
    Compound { stem: String, tails: Vec<String> },
}

/// Split `NAME` into its stem and raw tail parts.
pub(crate) fn parse_target(name: &str) -> anyhow::Result<Target> {
    if name.is_empty() {
        bail!("missing variable name");
    }
    let Some((stem, rest)) = name.split_once('.') else {
        return Ok(Target::Simple(name.to_string()));
    };
    if stem.is_empty() {
        bail!("invalid variable name '{}'", name);
    }
    if rest.is_empty() {
        return Ok(Target::Stem(stem.to_string()));
    }
    Ok(Target::Compound {
        stem: stem.to_string(),
        tails: rest.split('.').map(str::to_string).collect(),
    })
}

/// Integer, float, or text; double quotes force text.
pub(crate) fn parse_value(raw: &str) -> Val {
    let raw = raw.trim();
    if raw.len() >= 2
        && let Some(text) = raw.strip_prefix('"').and_then(|rest| rest.strip_suffix('"'))
    {
        return Val::str(text);
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Val::Int(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return Val::Float(float);
    }
    Val::str(raw)
}

fn show(value: Option<Val>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "<unset>".to_string(),
    }
}

/// One dictionary driven by the command language.
pub struct Session {
    dict: VariableDictionary,
}

impl Session {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            dict: VariableDictionary::with_config(config),
        }
    }

    pub fn dictionary(&self) -> &VariableDictionary {
        &self.dict
    }

    /// Tail parts naming a set simple variable are replaced by its value.
    fn resolve_tails(&self, tails: &[String]) -> Vec<String> {
        tails
            .iter()
            .map(|part| match self.dict.value(part) {
                Some(value) if !part.is_empty() => value.to_string(),
                _ => part.clone(),
            })
            .collect()
    }

    /// Run one command line; returns the text to print, if any.
    pub fn execute(&mut self, line: &str) -> anyhow::Result<Option<String>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        debug!(target: "varpool::cli", command, "session.command");
        match command {
            "set" => {
                let (name, value) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| anyhow!("usage: set NAME VALUE"))?;
                self.set(name, parse_value(value))?;
                Ok(None)
            }
            "get" => Ok(Some(show(self.get(rest)?))),
            "drop" => {
                self.drop_target(rest)?;
                Ok(None)
            }
            "stem" => {
                let (name, value) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| anyhow!("usage: stem STEM. VALUE"))?;
                let stem = name.trim_end_matches('.');
                if stem.is_empty() || stem.contains('.') {
                    bail!("invalid stem name '{}'", name);
                }
                self.dict.assign_stem(stem, parse_value(value))?;
                Ok(None)
            }
            "vars" => Ok(Some(self.vars())),
            "stats" => {
                let stats = self.dict.table().stats();
                Ok(Some(format!(
                    "primary_size={} capacity={} entries={} overflow_in_use={} longest_chain={}",
                    stats.primary_size, stats.capacity, stats.entries, stats.overflow_in_use, stats.longest_chain
                )))
            }
            "save" => {
                let path = Path::new(rest);
                save_dictionary(&self.dict).write_to(path)?;
                Ok(Some(format!("saved {} variables to {}", self.dict.len(), path.display())))
            }
            "load" => {
                let path = Path::new(rest);
                self.dict = load_dictionary(&Image::read_from(path)?)?;
                Ok(Some(format!("loaded {} variables from {}", self.dict.len(), path.display())))
            }
            "help" => Ok(Some(HELP.to_string())),
            other => bail!("unknown command '{}'", other),
        }
    }

    fn set(&mut self, name: &str, value: Val) -> anyhow::Result<()> {
        match parse_target(name)? {
            Target::Simple(name) => {
                self.dict.assign(&name, value)?;
            }
            Target::Stem(stem) => {
                self.dict.assign(&stem_key(&stem), value)?;
            }
            Target::Compound { stem, tails } => {
                let tails = self.resolve_tails(&tails);
                self.dict.assign_compound(&stem, &tails, value)?;
            }
        }
        Ok(())
    }

    fn get(&self, name: &str) -> anyhow::Result<Option<Val>> {
        Ok(match parse_target(name)? {
            Target::Simple(name) => self.dict.value(&name),
            Target::Stem(stem) => self.dict.lookup_stem(&stem).and_then(|stem| stem.default_value()),
            Target::Compound { stem, tails } => self.dict.compound_value(&stem, &self.resolve_tails(&tails)),
        })
    }

    fn drop_target(&mut self, name: &str) -> anyhow::Result<bool> {
        Ok(match parse_target(name)? {
            Target::Simple(name) => self.dict.drop_var(&name),
            Target::Stem(stem) => self.dict.drop_var(&stem_key(&stem)),
            Target::Compound { stem, tails } => {
                let tails = self.resolve_tails(&tails);
                self.dict.drop_compound(&stem, &tails)
            }
        })
    }

    fn vars(&self) -> String {
        let mut lines = Vec::new();
        for cell in self.dict.variables() {
            match cell.get() {
                Some(Val::Stem(stem)) => {
                    lines.push(format!("{} = {}", cell.name(), show(stem.default_value())));
                    for (tail, value) in stem.tails() {
                        lines.push(format!("{}{} = {}", stem.name(), tail, value));
                    }
                }
                value => lines.push(format!("{} = {}", cell.name(), show(value))),
            }
        }
        lines.join("\n")
    }

    /// Run every line of `source`, writing output to `out`. Stops at the first
    /// failing line.
    pub fn run_script(&mut self, source: &str, out: &mut impl Write) -> anyhow::Result<()> {
        for (number, line) in source.lines().enumerate() {
            let output = self.execute(line).with_context(|| format!("line {}", number + 1))?;
            if let Some(text) = output
                && !text.is_empty()
            {
                writeln!(out, "{}", text)?;
            }
        }
        Ok(())
    }
}
