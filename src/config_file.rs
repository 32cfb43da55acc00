use anyhow::{anyhow, Context, Result};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const PROJECT_FILE_NAME: &str = ".drainflowrc";
const MAX_ALIAS_DEPTH: usize = 10;

/// Configuration file handler for drainflow
///
/// ```ini
/// # applied before the real command-line arguments
/// defaults = --processors 4 --state templates.json
///
/// [aliases]
/// nginx = -f json --message-field msg
/// ```
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigFile {
    pub defaults: Option<String>,
    pub aliases: HashMap<String, String>,
}

impl ConfigFile {
    /// Find project-level .drainflowrc by walking up from the current directory
    pub fn find_project_config() -> Option<PathBuf> {
        let start = env::current_dir().ok()?;
        Self::find_project_config_from(&start)
    }

    fn find_project_config_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(PROJECT_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// User config file locations in order of preference
    pub fn get_user_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if cfg!(windows) {
            if let Ok(appdata) = env::var("APPDATA") {
                paths.push(PathBuf::from(appdata).join("drainflow").join("config.ini"));
            }
            if let Ok(userprofile) = env::var("USERPROFILE") {
                paths.push(PathBuf::from(userprofile).join(PROJECT_FILE_NAME));
            }
        } else {
            let xdg_config = env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    env::var("HOME")
                        .map(|h| PathBuf::from(h).join(".config"))
                        .unwrap_or_else(|_| PathBuf::from(".config"))
                });
            paths.push(xdg_config.join("drainflow").join("config.ini"));

            if let Ok(home) = env::var("HOME") {
                paths.push(PathBuf::from(home).join(PROJECT_FILE_NAME));
            }
        }

        paths
    }

    /// Merged configuration: project file over the first user file found
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = Self::get_user_config_paths().iter().find(|p| p.exists()) {
            config = config.overlay(Self::load_from_path(path)?);
        }
        if let Some(path) = Self::find_project_config() {
            config = config.overlay(Self::load_from_path(&path)?);
        }

        Ok(config)
    }

    pub fn load_with_custom_path(custom_path: Option<&str>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(Path::new(path)),
            None => Self::load(),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Ok(Self::parse_ini_content(&content))
    }

    fn parse_ini_content(content: &str) -> Self {
        let mut config = Self::default();
        let mut section = String::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match section.as_str() {
                "" if key == "defaults" => config.defaults = Some(value.to_string()),
                "aliases" => {
                    config.aliases.insert(key.to_string(), value.to_string());
                }
                _ => {}
            }
        }

        config
    }

    /// `other` wins for defaults and for aliases defined in both
    fn overlay(mut self, other: Self) -> Self {
        if other.defaults.is_some() {
            self.defaults = other.defaults;
        }
        self.aliases.extend(other.aliases);
        self
    }

    /// Show configuration sources and the merged result
    pub fn show_config() {
        println!("Configuration precedence: CLI > project .drainflowrc > user config > defaults\n");

        let project_path = Self::find_project_config();
        let user_paths = Self::get_user_config_paths();

        match Self::load() {
            Ok(merged) => {
                let user_path = user_paths.iter().find(|p| p.exists());
                if project_path.is_none() && user_path.is_none() {
                    println!("No configuration files found. Using defaults.");
                } else {
                    println!("Configuration loaded from:");
                    if let Some(path) = &project_path {
                        println!("  Project: {}", path.display());
                    }
                    if let Some(path) = user_path {
                        println!("  User: {}", path.display());
                    }
                }

                if let Some(defaults) = &merged.defaults {
                    println!("\nActive defaults:\n  defaults = {}", defaults);
                }

                if !merged.aliases.is_empty() {
                    println!("\nActive aliases:");
                    let mut aliases: Vec<_> = merged.aliases.iter().collect();
                    aliases.sort();
                    for (name, value) in aliases {
                        println!("  {} = {}", name, value);
                    }
                }
            }
            Err(e) => eprintln!("Error loading configuration: {:#}", e),
        }

        println!("\nConfiguration search locations (in precedence order):");
        match &project_path {
            Some(path) => println!("  1. Project: {} (found)", path.display()),
            None => println!(
                "  1. Project: {} (searched up directory tree, not found)",
                PROJECT_FILE_NAME
            ),
        }
        for (i, path) in user_paths.iter().enumerate() {
            let status = if path.exists() { "(found)" } else { "(not found)" };
            println!("  {}. User: {} {}", i + 2, path.display(), status);
        }
    }

    fn resolve_alias(&self, name: &str, seen: &mut HashSet<String>) -> Result<Vec<String>> {
        if seen.len() > MAX_ALIAS_DEPTH {
            return Err(anyhow!("Alias chain too deep: {} levels", seen.len()));
        }
        if !seen.insert(name.to_string()) {
            return Err(anyhow!("Circular dependency detected in alias: {}", name));
        }

        let value = self
            .aliases
            .get(name)
            .ok_or_else(|| anyhow!("Unknown alias: {}", name))?;
        let args = shell_words::split(value)
            .with_context(|| format!("Invalid alias '{}': failed to parse arguments", name))?;

        let expanded = self.expand_aliases(args, seen)?;
        seen.remove(name);
        Ok(expanded)
    }

    fn expand_aliases(&self, args: Vec<String>, seen: &mut HashSet<String>) -> Result<Vec<String>> {
        let mut result = Vec::with_capacity(args.len());
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            if arg == "-a" || arg == "--alias" {
                if let Some(name) = iter.next() {
                    result.extend(self.resolve_alias(&name, seen)?);
                    continue;
                }
            } else if let Some(name) = arg.strip_prefix("--alias=") {
                result.extend(self.resolve_alias(name, seen)?);
                continue;
            }
            result.push(arg);
        }

        Ok(result)
    }

    /// Prepend `defaults` after the program name, then expand `-a NAME`
    pub fn process_args(&self, args: Vec<String>) -> Result<Vec<String>> {
        let mut combined = Vec::with_capacity(args.len());
        let mut args = args.into_iter();

        if let Some(program) = args.next() {
            combined.push(program);
        }
        if let Some(defaults) = &self.defaults {
            let default_args = shell_words::split(defaults)
                .context("Invalid defaults: failed to parse arguments")?;
            combined.extend(default_args);
        }
        combined.extend(args);

        self.expand_aliases(combined, &mut HashSet::new())
    }
}
