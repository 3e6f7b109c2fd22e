use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::calc::CalcConfig;
use crate::constants::files;
use crate::loader::layers::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};

/// Loads, merges and validates `calc.toml` layers.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: CalcConfig,
    workspace_root: Option<PathBuf>,
    layer_stack: ConfigLayerStack,
}

impl ConfigManager {
    /// Load configuration from the default locations.
    ///
    /// `DEBRIEF_CALC_CONFIG_PATH` selects an explicit file, otherwise
    /// `DEBRIEF_WORKSPACE` (or the current directory) names the workspace.
    pub fn load() -> Result<Self> {
        if let Some(config_path) = non_empty_env(files::CONFIG_PATH_ENV) {
            return Self::load_from_file(&config_path).with_context(|| {
                format!(
                    "Failed to load configuration from {}={}",
                    files::CONFIG_PATH_ENV,
                    config_path
                )
            });
        }

        if let Some(workspace) = non_empty_env(files::WORKSPACE_ENV) {
            return Self::load_from_workspace(&workspace).with_context(|| {
                format!(
                    "Failed to load configuration from {}={}",
                    files::WORKSPACE_ENV,
                    workspace
                )
            });
        }

        let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
        Self::load_from_workspace(cwd)
    }

    /// Load the user layer followed by the workspace layer.
    pub fn load_from_workspace(workspace: impl AsRef<Path>) -> Result<Self> {
        Self::load_layers(
            Self::user_config_path().as_deref(),
            Some(workspace.as_ref()),
            None,
        )
    }

    /// Load the user layer followed by an explicit file, which must exist.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_layers(
            Self::user_config_path().as_deref(),
            None,
            Some(path.as_ref()),
        )
    }

    /// Build a manager from explicit layer locations, lowest precedence first.
    pub fn load_layers(
        user_config: Option<&Path>,
        workspace: Option<&Path>,
        explicit: Option<&Path>,
    ) -> Result<Self> {
        let mut layer_stack = ConfigLayerStack::default();

        if let Some(file) = user_config {
            if let Some(toml) = Self::load_optional_layer(file) {
                layer_stack.push(ConfigLayerEntry::new(
                    ConfigLayerSource::User {
                        file: file.to_path_buf(),
                    },
                    toml,
                ));
            }
        }

        let workspace_root = workspace.map(Path::to_path_buf);
        if let Some(root) = &workspace_root {
            let file = Self::workspace_config_path(root);
            if let Some(toml) = Self::load_optional_layer(&file) {
                layer_stack.push(ConfigLayerEntry::new(
                    ConfigLayerSource::Workspace { file },
                    toml,
                ));
            }
        }

        if let Some(file) = explicit {
            if !file.is_file() {
                bail!("Configuration file not found: {}", file.display());
            }
            let toml = Self::load_toml_from_file(file)?;
            layer_stack.push(ConfigLayerEntry::new(
                ConfigLayerSource::Explicit {
                    file: file.to_path_buf(),
                },
                toml,
            ));
        }

        let config = if layer_stack.is_empty() {
            CalcConfig::default()
        } else {
            layer_stack
                .effective_config()
                .try_into()
                .context("Failed to deserialize effective configuration")?
        };

        config
            .validate()
            .context("Configuration failed validation")?;

        debug!(
            layers = layer_stack.layers().len(),
            "loaded calc client configuration"
        );

        Ok(Self {
            config,
            workspace_root,
            layer_stack,
        })
    }

    pub fn config(&self) -> &CalcConfig {
        &self.config
    }

    pub fn into_config(self) -> CalcConfig {
        self.config
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }

    pub fn layer_stack(&self) -> &ConfigLayerStack {
        &self.layer_stack
    }

    /// Highest-precedence file that contributed to the configuration.
    pub fn config_path(&self) -> Option<&Path> {
        self.layer_stack
            .layers()
            .last()
            .map(|layer| layer.source.file())
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| {
            home.join(files::CONFIG_DIR_NAME)
                .join(files::CONFIG_FILE_NAME)
        })
    }

    pub fn workspace_config_path(workspace: &Path) -> PathBuf {
        workspace
            .join(files::CONFIG_DIR_NAME)
            .join(files::CONFIG_FILE_NAME)
    }

    // Missing implicit layers are normal; unreadable ones are skipped with a warning.
    fn load_optional_layer(path: &Path) -> Option<toml::Value> {
        if !path.is_file() {
            return None;
        }
        match Self::load_toml_from_file(path) {
            Ok(toml) => Some(toml),
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "ignoring config layer");
                None
            }
        }
    }

    fn load_toml_from_file(path: &Path) -> Result<toml::Value> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(value)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
