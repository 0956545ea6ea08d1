use anyhow::{bail, Context, Result};
use figment::{providers::Format, Figment};
use serde::{de::DeserializeOwned, Serialize};
use std::{marker::PhantomData, path::PathBuf};

/// The builder we use to build a service Config
/// layers are merged in order of preference (last wins):
///
/// 1. `CONFIG::default()`
/// 2. the `[default]` section of the TOML file
/// 3. the `ARG::TOML_IDENTIFIER` section of the TOML file
/// 4. env vars and cli args
#[derive(Debug)]
pub struct ConfigBuilder<CONFIG, ARG> {
    pub cli_env_args: ARG,
    _config: PhantomData<CONFIG>,
}

pub trait CliEnvExt: Serialize + DeserializeOwned + Default + std::fmt::Debug {
    // e.g. "INGESTER"
    const ENV_VAR_PREFIX: &'static str;

    // The section identifier in the TOML file, e.g. "ingester"
    const TOML_IDENTIFIER: &'static str;

    // whether to print debug messages during config loading
    const PRINT_DEBUG_MSGS: bool = false;

    // an optional argument to specify the home directory
    // if not supplied, config will try a series of fallbacks
    fn home_dir(&self) -> Option<PathBuf>;

    // an optional path to a dotenv file
    // if not supplied, the current working directory's .env is tried
    fn dotenv_path(&self) -> Option<PathBuf>;

    fn merge_cli_env_args(&self) -> Result<Self> {
        let env_prefix = format!("{}_", Self::ENV_VAR_PREFIX);

        let _self = Figment::new()
            .merge(figment::providers::Env::prefixed(&env_prefix))
            .merge(figment::providers::Serialized::defaults(self))
            .extract()?;

        Ok(_self)
    }

    fn env_var(name: &str) -> Option<String> {
        std::env::var(format!("{}_{name}", Self::ENV_VAR_PREFIX)).ok()
    }
}

pub trait ConfigExt: Serialize + DeserializeOwned + Default + std::fmt::Debug {
    // e.g. "ingester.toml"
    const FILENAME: &'static str;

    // e.g. "ingester", used for ~/.ingester, /etc/ingester, etc.
    const DIRNAME: &'static str;

    fn log_levels(&self) -> impl Iterator<Item = &str>;

    fn tracing_env_filter(&self) -> Result<tracing_subscriber::EnvFilter> {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in self.log_levels() {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => bail!("{}: {}", err, directive),
            }
        }

        Ok(filter)
    }
}

impl<CONFIG: ConfigExt, ARG: CliEnvExt> ConfigBuilder<CONFIG, ARG> {
    pub fn new(cli_env_args: ARG) -> Self {
        Self {
            cli_env_args,
            _config: PhantomData,
        }
    }

    pub fn build(self) -> Result<CONFIG> {
        // try to load dotenv first, since it may affect env vars for filepaths
        let mut dotenv_paths = Vec::new();

        if let Some(dotenv_path) = self.cli_env_args.dotenv_path() {
            dotenv_paths.push(dotenv_path);
        }

        if let Some(dotenv_path) = ARG::env_var("DOTENV") {
            dotenv_paths.push(PathBuf::from(dotenv_path));
        }

        dotenv_paths.push(std::env::current_dir()?.join(".env"));

        for dotenv_path in dotenv_paths {
            if ARG::PRINT_DEBUG_MSGS {
                eprintln!("Loading env vars from {}", dotenv_path.display());
            }
            if dotenv_path.exists() {
                if let Err(e) = dotenvy::from_path(dotenv_path) {
                    bail!("Error loading dotenv file: {}", e);
                }
            }
        }

        // first merge the cli and env vars
        let cli_env_args = self.cli_env_args.merge_cli_env_args()?;

        let home_dir = cli_env_args
            .home_dir()
            .map(|dir| PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).to_string()));

        let mut figment =
            Figment::new().merge(figment::providers::Serialized::defaults(CONFIG::default()));

        // the config file is optional, every value has a default
        match ConfigFilePath::new(CONFIG::FILENAME, CONFIG::DIRNAME, ARG::ENV_VAR_PREFIX, home_dir)
            .into_path()
        {
            Some(filepath) => {
                if ARG::PRINT_DEBUG_MSGS {
                    eprintln!("Loading config from {}", filepath.display());
                }
                figment = figment
                    // global values first
                    .merge(Figment::from(
                        figment::providers::Toml::file(&filepath).nested(),
                    ))
                    // then the specific section, overriding globals where needed
                    .merge(
                        Figment::from(figment::providers::Toml::file(&filepath).nested())
                            .select(ARG::TOML_IDENTIFIER),
                    );
            }
            None => {
                if ARG::PRINT_DEBUG_MSGS {
                    eprintln!("No {} found, using defaults", CONFIG::FILENAME);
                }
            }
        }

        // Finally override with cli/env args, as globals so they win over any selected section
        let config: CONFIG = figment
            .merge(figment::providers::Serialized::globals(cli_env_args))
            .extract()
            .context("Unable to extract config")?;

        Ok(config)
    }
}

// a helper to try a series of fallback paths, looking for a config file
#[derive(Clone, Debug)]
pub struct ConfigFilePath {
    // the filename to look for in each directory, e.g. "ingester.toml"
    pub filename: String,
    // the directory name used under home/config/etc, e.g. "ingester"
    pub dirname: String,
    // the env var prefix, used to look up {PREFIX}_HOME
    pub env_prefix: String,
    // the optional directory set via direct args or env
    pub arg_env_dir: Option<PathBuf>,
}

impl ConfigFilePath {
    pub fn new(
        filename: impl ToString,
        dirname: impl ToString,
        env_prefix: impl ToString,
        arg_env_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            dirname: dirname.to_string(),
            env_prefix: env_prefix.to_string(),
            arg_env_dir,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        self.into_possible().into_iter().find(|path| path.exists())
    }

    // tries a series of fallbacks
    pub fn into_possible(self) -> Vec<PathBuf> {
        let Self {
            filename,
            dirname,
            env_prefix,
            arg_env_dir,
        } = self;

        // the paths returned will be tried in order of pushing
        let mut dirs = Vec::new();

        // explicit, e.g. passing --home /foo to a binary
        // i.e. the path in this case will be /foo/{filename}
        if let Some(dir) = arg_env_dir {
            dirs.push(dir);
        }

        // literal env var, e.g. INGESTER_HOME
        if let Ok(dir) = std::env::var(format!("{env_prefix}_HOME")) {
            dirs.push(dir.into());
        }

        // next, check the current working directory, wherever the command is run from
        if let Ok(dir) = std::env::current_dir() {
            dirs.push(dir);
        }

        // ~/.{dirname}/{filename}, to not pollute the home directory
        if let Some(dir) = dirs::home_dir().map(|dir| dir.join(format!(".{dirname}"))) {
            dirs.push(dir);
        }

        // the system config directory, e.g:
        // Linux: ~/.config/{dirname}/{filename}
        // macOS: ~/Library/Application Support/{dirname}/{filename}
        if let Some(dir) = dirs::config_dir().map(|dir| dir.join(&dirname)) {
            dirs.push(dir);
        }

        if let Some(dir) = std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .map(|dir| dir.join(&dirname))
        {
            dirs.push(dir);
        }

        // Lastly, try /etc/{dirname}/{filename}
        dirs.push(PathBuf::from("/etc").join(&dirname));

        let mut all_files: Vec<PathBuf> = dirs.into_iter().map(|dir| dir.join(&filename)).collect();

        all_files.dedup();

        all_files
    }
}
