//! Repository configuration: `.drs/config.yaml`.
//!
//! A mapping of remote-name → tagged remote descriptor plus a default
//! remote. Loaded per command and passed by value; the core never mutates
//! it concurrently and never caches it process-wide.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::indexd::{DrsClient, Gen3Client};

pub const CONFIG_DIR: &str = ".drs";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remotes: BTreeMap<String, Remote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_remote: Option<String>,
}

/// One backend, tagged by kind. Serializes as `{gen3: {...}}` / `{anvil: {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Remote {
    Gen3(Gen3Remote),
    Anvil(AnvilRemote),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gen3Remote {
    pub endpoint: String,
    pub auth: Gen3Auth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gen3Auth {
    #[serde(default = "default_profile")]
    pub profile: String,
    pub project_id: String,
    pub bucket: String,
}

fn default_profile() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnvilRemote {
    pub endpoint: String,
    pub auth: AnvilAuth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnvilAuth {
    pub terra_project: String,
}

impl Config {
    pub fn path(repo_root: &Path) -> PathBuf {
        repo_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Loads the repository config.
    ///
    /// # Errors
    ///
    /// A missing file is an environment error carrying the `git drs init`
    /// directive; an unparseable file is a config error.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = Self::path(repo_root);
        let text = std::fs::read_to_string(&path).map_err(|_| {
            Error::Environment(format!(
                "no DRS configuration at {}; run `git drs init` first",
                path.display()
            ))
        })?;
        serde_yaml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, repo_root: &Path) -> Result<()> {
        let dir = repo_root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir)?;
        let text = serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(dir.join(CONFIG_FILE), text)?;
        Ok(())
    }

    /// Resolves `name` (or the default remote) to its descriptor.
    pub fn remote<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Remote)> {
        let name = match name {
            Some(n) => n,
            None => self.default_remote.as_deref().ok_or_else(|| {
                Error::Environment(
                    "no default remote configured; pass --remote or run \
                     `git drs set-remote --default`"
                        .to_string(),
                )
            })?,
        };
        let remote = self.remotes.get(name).ok_or_else(|| {
            Error::Environment(format!(
                "unknown remote '{name}'; run `git drs set-remote` first"
            ))
        })?;
        Ok((name, remote))
    }

    /// Inserts or replaces a remote. The first remote ever added becomes
    /// the default; `make_default` forces it.
    pub fn set_remote(&mut self, name: &str, remote: Remote, make_default: bool) {
        self.remotes.insert(name.to_string(), remote);
        if make_default || self.default_remote.is_none() {
            self.default_remote = Some(name.to_string());
        }
    }
}

impl Remote {
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Gen3(r) => &r.endpoint,
            Self::Anvil(r) => &r.endpoint,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::Gen3(r) => Some(&r.auth.project_id),
            Self::Anvil(_) => None,
        }
    }

    pub fn bucket(&self) -> Option<&str> {
        match self {
            Self::Gen3(r) => Some(&r.auth.bucket),
            Self::Anvil(_) => None,
        }
    }

    /// Builds the capability client for this backend.
    ///
    /// # Errors
    ///
    /// AnVIL has no working implementation and always errors; gen3 errors
    /// when no token can be found for the configured profile.
    pub fn client(&self) -> Result<DrsClient> {
        match self {
            Self::Gen3(r) => {
                let token = token_for_profile(&r.auth.profile)?;
                Ok(DrsClient::Gen3(Gen3Client::new(
                    &r.endpoint,
                    &r.auth.project_id,
                    &r.auth.bucket,
                    token,
                )?))
            }
            Self::Anvil(_) => Err(Error::Environment(
                "the anvil backend needs to be implemented".to_string(),
            )),
        }
    }
}

/// Bearer token for a named auth profile: `GEN3_TOKEN` wins, else
/// `~/.gen3/<profile>.token`. Read-only; the token cache is never written.
pub fn token_for_profile(profile: &str) -> Result<String> {
    if let Ok(token) = std::env::var("GEN3_TOKEN")
        && !token.trim().is_empty()
    {
        return Ok(token.trim().to_string());
    }
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| Error::Environment("HOME is not set; export GEN3_TOKEN instead".into()))?;
    let path = home.join(".gen3").join(format!("{profile}.token"));
    match std::fs::read_to_string(&path) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(Error::Environment(format!(
            "no token for profile '{profile}'; export GEN3_TOKEN or write {}",
            path.display()
        ))),
    }
}
