//! The command-definition registry (§4.B).
//!
//! Commands are declared in a directory tree of YAML files (grounded in
//! `original_source/formats/gds/cmddef.py`). Each file holds a [`GroupFile`]:
//! a `prefix` that concatenates with any parent prefix, a default `context`,
//! a list of commands, and optionally nested `groups`. [`Registry::load`]
//! walks the tree, flattens it into [`Command`] values, and builds the
//! bidirectional id/name maps the reader, writer and text layers all need.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::Deserialize;

pub const CONTEXTS: &[&str] = &["all", "event", "room", "puzzle"];

#[derive(Debug, Clone)]
pub enum Error {
    DuplicateId { id: u16, existing: String, new: String },
    DuplicateName { name: String, existing: u16, new: u16 },
    Yaml(String),
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateId { id, existing, new } => {
                write!(f, "command id {id:#x} defined twice ({existing} and {new})")
            }
            Error::DuplicateName { name, existing, new } => {
                write!(f, "command name {name:?} defined twice ({existing:#x} and {new:#x})")
            }
            Error::Yaml(msg) => write!(f, "{msg}"),
            Error::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// A single declared parameter of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandParam {
    pub name: String,
    pub type_descriptor: String,
    pub desc: Option<String>,
    pub uncertain: bool,
    pub optional: bool,
}

/// Which control-flow shape a complex command uses, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complex {
    If,
    Elif,
    Else,
    While,
    RepeatN,
}

/// A fully resolved command definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: u16,
    pub name: String,
    pub aliases: Vec<String>,
    pub desc: Option<String>,
    pub uncertain: bool,
    /// Set when the command itself can appear as a term in a condition list
    /// (i.e. it returns a boolean usable by `if`/`while`).
    pub condition: bool,
    pub context: Vec<String>,
    pub params: Vec<CommandParam>,
    pub complex: Option<Complex>,
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParamsField {
    List(Vec<ParamEntry>),
    Map(HashMap<String, ParamEntry>),
}

#[derive(Debug, Deserialize, Default)]
struct ParamEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    type_descriptor: Option<String>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    uncertain: bool,
    #[serde(default)]
    optional: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContextField {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize, Default)]
struct CommandEntry {
    #[serde(default)]
    id: Option<u16>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    uncertain: bool,
    #[serde(default)]
    condition: bool,
    #[serde(default)]
    context: Option<ContextField>,
    #[serde(default)]
    params: Option<ParamsField>,
    #[serde(default)]
    complex: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandsField {
    List(Vec<CommandEntry>),
    Map(HashMap<String, CommandEntry>),
}

#[derive(Debug, Deserialize, Default)]
struct GroupFile {
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    context: Option<ContextField>,
    #[serde(default)]
    commands: Option<CommandsField>,
    #[serde(default)]
    groups: Vec<GroupFile>,
}

fn context_list(field: Option<ContextField>, default: &[String]) -> Vec<String> {
    match field {
        Some(ContextField::One(s)) => vec![s],
        Some(ContextField::Many(v)) => v,
        None => default.to_vec(),
    }
}

fn parse_complex(s: &str) -> Option<Complex> {
    match s {
        "if" => Some(Complex::If),
        "elif" => Some(Complex::Elif),
        "else" => Some(Complex::Else),
        "while" => Some(Complex::While),
        "repeatN" | "repeatn" => Some(Complex::RepeatN),
        _ => None,
    }
}

fn flatten_group(
    group: GroupFile,
    parent_prefix: &str,
    parent_context: &[String],
    filename: &str,
    out: &mut Vec<Command>,
) {
    let prefix = match &group.prefix {
        Some(p) => format!("{parent_prefix}{p}"),
        None => parent_prefix.to_string(),
    };
    let context = context_list(group.context, parent_context);

    let entries: Vec<(Option<String>, CommandEntry)> = match group.commands {
        Some(CommandsField::List(list)) => list.into_iter().map(|c| (None, c)).collect(),
        Some(CommandsField::Map(map)) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
        None => Vec::new(),
    };

    for (key, entry) in entries {
        let name = match (&key, &entry.name) {
            (Some(k), None) => k.clone(),
            (Some(k), Some(n)) if k.parse::<u16>().is_err() => {
                if k != n {
                    log::warn!("command key {k:?} and name {n:?} disagree in {filename}");
                }
                n.clone()
            }
            (_, Some(n)) => n.clone(),
            (None, None) => continue,
        };
        let id = match (&key, entry.id) {
            (Some(k), None) => k.parse::<u16>().ok(),
            (_, Some(id)) => Some(id),
            (None, None) => None,
        };
        let Some(id) = id else {
            log::warn!("command {name:?} in {filename} has no id, skipping");
            continue;
        };

        let params = match entry.params {
            Some(ParamsField::List(list)) => list
                .into_iter()
                .enumerate()
                .map(|(i, p)| CommandParam {
                    name: p.name.unwrap_or_else(|| format!("arg{i}")),
                    type_descriptor: p.type_descriptor.unwrap_or_else(|| "int".to_string()),
                    desc: p.desc,
                    uncertain: p.uncertain,
                    optional: p.optional,
                })
                .collect(),
            Some(ParamsField::Map(map)) => {
                let mut v: Vec<_> = map.into_iter().collect();
                v.sort_by(|a, b| a.0.cmp(&b.0));
                v.into_iter()
                    .map(|(k, p)| CommandParam {
                        name: p.name.unwrap_or(k),
                        type_descriptor: p.type_descriptor.unwrap_or_else(|| "int".to_string()),
                        desc: p.desc,
                        uncertain: p.uncertain,
                        optional: p.optional,
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let cmd_context = context_list(entry.context, &context);

        out.push(Command {
            id,
            name: format!("{prefix}{name}"),
            aliases: entry
                .aliases
                .into_iter()
                .map(|a| format!("{prefix}{a}"))
                .collect(),
            desc: entry.desc,
            uncertain: entry.uncertain,
            condition: entry.condition,
            context: cmd_context,
            params,
            complex: entry.complex.as_deref().and_then(parse_complex),
            file: Some(filename.to_string()),
        });
    }

    for child in group.groups {
        flatten_group(child, &prefix, &context, filename, out);
    }
}

/// The loaded, cross-checked set of known commands. Aliases claimed by more
/// than one command are dropped after a warning (matching the original
/// loader's `ALIAS_CONFLICT` behavior) rather than kept under a sentinel.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    by_id: HashMap<u16, Command>,
    by_name: HashMap<String, u16>,
}

impl Registry {
    /// Walks `root` for `.yml`/`.yaml` files and builds the registry,
    /// computing each file's prefix from its path relative to `root`.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let mut commands = Vec::new();
        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            let text = std::fs::read_to_string(path).map_err(|e| Error::Io(e.to_string()))?;
            let group: GroupFile =
                serde_yaml::from_str(&text).map_err(|e| Error::Yaml(e.to_string()))?;
            let filename = path.to_string_lossy().to_string();
            flatten_group(group, "", &["all".to_string()], &filename, &mut commands);
        }
        Self::build(commands)
    }

    fn build(commands: Vec<Command>) -> Result<Self, Error> {
        let mut by_id: HashMap<u16, Command> = HashMap::new();
        let mut by_name: HashMap<String, u16> = HashMap::new();
        // Names registered as some command's own canonical name. A later
        // alias can never displace one of these; only alias-vs-alias
        // collisions get dropped.
        let mut canonical_names: HashSet<String> = HashSet::new();
        let mut conflicted_aliases: Vec<String> = Vec::new();

        for cmd in commands {
            if let Some(existing) = by_id.get(&cmd.id) {
                return Err(Error::DuplicateId {
                    id: cmd.id,
                    existing: existing.name.clone(),
                    new: cmd.name.clone(),
                });
            }
            if let Some(&existing) = by_name.get(&cmd.name) {
                if canonical_names.contains(&cmd.name) {
                    return Err(Error::DuplicateName {
                        name: cmd.name.clone(),
                        existing,
                        new: cmd.id,
                    });
                }
                log::warn!(
                    "command name {:?} is already used as an alias by command {existing:#x}; the canonical definition takes precedence",
                    cmd.name
                );
            }
            by_name.insert(cmd.name.clone(), cmd.id);
            canonical_names.insert(cmd.name.clone());

            for alias in &cmd.aliases {
                if alias == &cmd.name {
                    continue;
                }
                match by_name.get(alias) {
                    None => {
                        by_name.insert(alias.clone(), cmd.id);
                    }
                    Some(_) if canonical_names.contains(alias) => {
                        log::warn!(
                            "command {:?} has alias {alias:?}, which is also a command name; the canonical definition takes precedence",
                            cmd.name
                        );
                    }
                    Some(_) => {
                        conflicted_aliases.push(alias.clone());
                    }
                }
            }
            by_id.insert(cmd.id, cmd);
        }

        for alias in conflicted_aliases {
            if canonical_names.contains(&alias) {
                continue;
            }
            log::warn!("alias {alias:?} claimed by multiple commands, dropping");
            by_name.remove(&alias);
        }

        for id in 0u16..0x100 {
            if !by_id.contains_key(&id) {
                log::warn!("command id {id:#x} has no definition");
            }
        }

        Ok(Registry { by_id, by_name })
    }

    pub fn by_id(&self, id: u16) -> Option<&Command> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Command> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.by_id.values()
    }

    #[cfg(test)]
    pub fn from_commands_for_test(commands: Vec<Command>) -> Self {
        Self::build(commands).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(id: u16, name: &str) -> Command {
        Command {
            id,
            name: name.to_string(),
            aliases: Vec::new(),
            desc: None,
            uncertain: false,
            condition: false,
            context: vec!["all".to_string()],
            params: Vec::new(),
            complex: None,
            file: None,
        }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = Registry::build(vec![cmd(1, "a"), cmd(1, "b")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateId { id: 1, .. }));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Registry::build(vec![cmd(1, "a"), cmd(2, "a")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));
    }

    #[test]
    fn drops_conflicting_aliases() {
        let mut c1 = cmd(1, "a");
        c1.aliases.push("shared".to_string());
        let mut c2 = cmd(2, "b");
        c2.aliases.push("shared".to_string());
        let reg = Registry::build(vec![c1, c2]).unwrap();
        assert!(reg.by_name("shared").is_none());
        assert!(reg.by_name("a").is_some());
        assert!(reg.by_name("b").is_some());
    }

    #[test]
    fn canonical_name_survives_alias_collision() {
        // `b`'s alias "a" collides with `a`'s own canonical name. The
        // canonical command must keep resolving, regardless of which one
        // was registered first.
        let mut c1 = cmd(1, "a");
        let mut c2 = cmd(2, "b");
        c2.aliases.push("a".to_string());
        let reg = Registry::build(vec![c1.clone(), c2.clone()]).unwrap();
        assert_eq!(reg.by_name("a").unwrap().id, 1);
        assert_eq!(reg.by_name("b").unwrap().id, 2);

        // Same collision, opposite registration order: the alias is seen
        // first and must be displaced once the canonical owner arrives.
        c1.aliases.clear();
        let reg = Registry::build(vec![c2, c1]).unwrap();
        assert_eq!(reg.by_name("a").unwrap().id, 1);
        assert_eq!(reg.by_name("b").unwrap().id, 2);
    }
}
