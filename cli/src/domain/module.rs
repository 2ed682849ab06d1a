//! Module definitions: the declarative description of a deployment type.
//!
//! A module file (`strata.yaml`) is parsed into a `ModuleFile`, then merged
//! over the canonical step table and validated into an immutable
//! `ModuleDefinition`. Cross-module rules (duplicates, unknown parents,
//! dependency cycles) live in [`ModuleRepository`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::domain::deployment::{is_reserved_file_name, validate_name};
use crate::domain::error::ValidationError;

/// Output name of the configuration runner's inventory.
pub const INVENTORY_OUTPUT: &str = "ansible_hosts";
/// Output name of the SSH client configuration.
pub const SSH_CONFIG_OUTPUT: &str = "ssh_config";

// ── Steps ─────────────────────────────────────────────────────────────────────

/// Built-in step implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinStep {
    Plan,
    Apply,
    Output,
    Ansible,
    Destroy,
    Cleanup,
    Pull,
}

impl BuiltinStep {
    /// The canonical step table, in order.
    pub const ALL: [Self; 7] = [
        Self::Plan,
        Self::Apply,
        Self::Output,
        Self::Ansible,
        Self::Destroy,
        Self::Cleanup,
        Self::Pull,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Output => "output",
            Self::Ansible => "ansible",
            Self::Destroy => "destroy",
            Self::Cleanup => "cleanup",
            Self::Pull => "pull",
        }
    }

    /// Whether this step reads the imported parent variables.
    #[must_use]
    pub fn requires_parents(self) -> bool {
        matches!(self, Self::Plan)
    }
}

impl fmt::Display for BuiltinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A module-specific step that runs an external command.
///
/// `argv` entries may contain `{module}`, `{project}`, `{workdir}`,
/// `{module_dir}` and `{output:<name>}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// What runs when a step name is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepHandler {
    Builtin(BuiltinStep),
    Command(CommandStep),
}

impl StepHandler {
    #[must_use]
    pub fn requires_parents(&self) -> bool {
        match self {
            Self::Builtin(step) => step.requires_parents(),
            Self::Command(_) => false,
        }
    }

    #[must_use]
    pub fn builtin(&self) -> Option<BuiltinStep> {
        match self {
            Self::Builtin(step) => Some(*step),
            Self::Command(_) => None,
        }
    }
}

// ── File format ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepSpec {
    Builtin {
        builtin: BuiltinStep,
    },
    Command {
        run: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

/// Raw `strata.yaml` contents, before defaults and validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleFile {
    name: String,
    provisioner_path: Option<PathBuf>,
    playbook_path: Option<PathBuf>,
    requirements_path: Option<PathBuf>,
    depends_on: Option<String>,
    default_steps: Option<Vec<String>>,
    /// Step overrides in file order.
    #[serde(default)]
    steps: serde_yaml::Mapping,
    required_outputs: Option<Vec<String>>,
    outputs: Option<BTreeMap<String, String>>,
    #[serde(default)]
    export_outputs: Vec<String>,
    #[serde(default)]
    export_prefix: String,
    #[serde(default)]
    terraform_vars: BTreeMap<String, String>,
    #[serde(default)]
    ansible_args: Vec<String>,
}

impl ModuleFile {
    /// Parse YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid module file.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

// ── Module definition ─────────────────────────────────────────────────────────

/// An immutable, validated module definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    pub name: String,
    /// Directory the module file was loaded from.
    pub module_dir: PathBuf,
    /// Provisioner configuration directory, relative to `module_dir`.
    pub provisioner_path: PathBuf,
    pub playbook_path: PathBuf,
    pub requirements_path: PathBuf,
    pub depends_on: Option<String>,
    pub default_steps: Vec<String>,
    steps: Vec<(String, StepHandler)>,
    pub required_outputs: BTreeSet<String>,
    /// Output name → file name inside the workspace.
    pub captured_outputs: BTreeMap<String, String>,
    /// Outputs appended verbatim to the export file, in this order.
    pub export_outputs: Vec<String>,
    pub export_prefix: String,
    pub terraform_vars: BTreeMap<String, String>,
    pub ansible_args: Vec<String>,
}

fn default_outputs() -> BTreeMap<String, String> {
    BTreeMap::from([
        (INVENTORY_OUTPUT.to_string(), "hosts".to_string()),
        (SSH_CONFIG_OUTPUT.to_string(), "ssh_config".to_string()),
    ])
}

fn default_steps() -> Vec<String> {
    ["plan", "apply", "output", "ansible"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl ModuleDefinition {
    /// A module with every default applied and the canonical step table.
    #[must_use]
    pub fn new(name: &str, module_dir: impl Into<PathBuf>) -> Self {
        let captured_outputs = default_outputs();
        Self {
            name: name.to_string(),
            module_dir: module_dir.into(),
            provisioner_path: PathBuf::from("."),
            playbook_path: PathBuf::from("ansible/play.yml"),
            requirements_path: PathBuf::from("ansible/requirements.yml"),
            depends_on: None,
            default_steps: default_steps(),
            steps: BuiltinStep::ALL
                .iter()
                .map(|s| (s.name().to_string(), StepHandler::Builtin(*s)))
                .collect(),
            required_outputs: captured_outputs.keys().cloned().collect(),
            captured_outputs,
            export_outputs: Vec::new(),
            export_prefix: String::new(),
            terraform_vars: BTreeMap::new(),
            ansible_args: Vec::new(),
        }
    }

    /// Apply a parsed module file over the defaults and validate the result.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` describing the first rule the file breaks.
    pub fn from_file(file: ModuleFile, module_dir: &Path) -> Result<Self, ValidationError> {
        let mut module = Self::new(&file.name, module_dir);
        if let Some(path) = file.provisioner_path {
            module.provisioner_path = path;
        }
        if let Some(path) = file.playbook_path {
            module.playbook_path = path;
        }
        if let Some(path) = file.requirements_path {
            module.requirements_path = path;
        }
        module.depends_on = file.depends_on;
        if let Some(steps) = file.default_steps {
            module.default_steps = steps;
        }
        for (key, value) in file.steps {
            let invalid = |reason: String| ValidationError::InvalidModule {
                module: file.name.clone(),
                reason,
            };
            let name = key
                .as_str()
                .ok_or_else(|| invalid(format!("step name {key:?} is not a string")))?
                .to_string();
            let spec: Option<StepSpec> = serde_yaml::from_value(value)
                .map_err(|e| invalid(format!("step '{name}': {e}")))?;
            match spec {
                None => module.remove_step(&name),
                Some(StepSpec::Builtin { builtin }) => {
                    module.set_step(&name, StepHandler::Builtin(builtin));
                }
                Some(StepSpec::Command { run, env }) => {
                    module.set_step(&name, StepHandler::Command(CommandStep { argv: run, env }));
                }
            }
        }
        if let Some(outputs) = file.outputs {
            module.captured_outputs = outputs;
        }
        module.required_outputs = match file.required_outputs {
            Some(required) => required.into_iter().collect(),
            None => default_outputs()
                .into_keys()
                .filter(|name| module.captured_outputs.contains_key(name))
                .collect(),
        };
        module.export_outputs = file.export_outputs;
        module.export_prefix = file.export_prefix;
        module.terraform_vars = file.terraform_vars;
        module.ansible_args = file.ansible_args;

        module.validate()?;
        Ok(module)
    }

    /// Replace (or add) the handler registered under `name`.
    pub fn set_step(&mut self, name: &str, handler: StepHandler) {
        if let Some(entry) = self.steps.iter_mut().find(|(n, _)| n == name) {
            entry.1 = handler;
        } else {
            self.steps.push((name.to_string(), handler));
        }
    }

    /// Remove the handler registered under `name`, if any.
    pub fn remove_step(&mut self, name: &str) {
        self.steps.retain(|(n, _)| n != name);
    }

    #[must_use]
    pub fn handler(&self, name: &str) -> Option<&StepHandler> {
        self.steps.iter().find(|(n, _)| n == name).map(|(_, h)| h)
    }

    /// Step names in table order.
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(n, _)| n.as_str())
    }

    /// Whether any registered step runs the configuration runner.
    #[must_use]
    pub fn has_ansible_step(&self) -> bool {
        self.steps
            .iter()
            .any(|(_, h)| h.builtin() == Some(BuiltinStep::Ansible))
    }

    /// Absolute provisioner configuration directory.
    #[must_use]
    pub fn provisioner_dir(&self) -> PathBuf {
        self.module_dir.join(&self.provisioner_path)
    }

    #[must_use]
    pub fn playbook(&self) -> PathBuf {
        self.module_dir.join(&self.playbook_path)
    }

    #[must_use]
    pub fn requirements(&self) -> PathBuf {
        self.module_dir.join(&self.requirements_path)
    }

    /// Check every rule that can be decided from this module alone.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a `ValidationError`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("module", &self.name)?;
        let invalid = |reason: String| ValidationError::InvalidModule {
            module: self.name.clone(),
            reason,
        };

        if let Some(parent) = &self.depends_on {
            if parent == &self.name {
                return Err(ValidationError::DependencyCycle {
                    chain: vec![self.name.clone(), parent.clone()],
                });
            }
            validate_name("module", parent)?;
        }

        for step in &self.default_steps {
            if self.handler(step).is_none() {
                return Err(invalid(format!("default step '{step}' is not a known step")));
            }
        }

        for (name, handler) in &self.steps {
            if let StepHandler::Command(cmd) = handler
                && cmd.argv.first().is_none_or(|p| p.trim().is_empty())
            {
                return Err(invalid(format!("step '{name}' has an empty command")));
            }
        }

        for (output, file) in &self.captured_outputs {
            if is_reserved_file_name(&self.name, file) {
                return Err(invalid(format!(
                    "output '{output}' uses the reserved file name '{file}'"
                )));
            }
            let path = Path::new(file);
            let plain = !file.is_empty()
                && path
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)));
            if !plain {
                return Err(invalid(format!(
                    "output '{output}' must be written to a relative path inside the workspace, got '{file}'"
                )));
            }
        }

        let ansible = self.has_ansible_step();
        for required in &self.required_outputs {
            let built_in = ansible && (required == INVENTORY_OUTPUT || required == SSH_CONFIG_OUTPUT);
            if !self.captured_outputs.contains_key(required) && !built_in {
                return Err(invalid(format!(
                    "required output '{required}' is not captured to a file"
                )));
            }
        }

        Ok(())
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

/// Every module loaded for one invocation, validated as a set.
#[derive(Debug, Clone, Default)]
pub struct ModuleRepository {
    modules: BTreeMap<String, ModuleDefinition>,
}

impl ModuleRepository {
    /// Build a repository from individually validated modules.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateModule`, `InvalidModule` for an unknown `depends_on`
    /// target, or `DependencyCycle`.
    pub fn new(modules: Vec<ModuleDefinition>) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for module in modules {
            if map.contains_key(&module.name) {
                return Err(ValidationError::DuplicateModule(module.name));
            }
            map.insert(module.name.clone(), module);
        }
        let repo = Self { modules: map };
        for module in repo.modules.values() {
            if let Some(parent) = &module.depends_on
                && !repo.modules.contains_key(parent)
            {
                return Err(ValidationError::InvalidModule {
                    module: module.name.clone(),
                    reason: format!("depends on unknown module '{parent}'"),
                });
            }
            repo.check_chain(module)?;
        }
        Ok(repo)
    }

    /// Walk the `depends_on` chain from `start`; revisiting a module is a cycle.
    fn check_chain(&self, start: &ModuleDefinition) -> Result<(), ValidationError> {
        let mut chain = vec![start.name.clone()];
        let mut current = start;
        while let Some(parent) = &current.depends_on {
            if chain.contains(parent) {
                chain.push(parent.clone());
                return Err(ValidationError::DependencyCycle { chain });
            }
            chain.push(parent.clone());
            match self.modules.get(parent) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Look up a module by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModule` listing the available names.
    pub fn get(&self, name: &str) -> Result<&ModuleDefinition, ValidationError> {
        self.modules
            .get(name)
            .ok_or_else(|| ValidationError::UnknownModule {
                name: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDefinition> {
        self.modules.values()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
