// src/advisories/mod.rs

//! Release advisories ledger
//!
//! The ledger lists one advisory per released source package, kept either
//! as text (`date;packages;toolkit version;flags;description` per line, `#`
//! comments allowed) or as a JSON array, optionally wrapped as
//! `advisories = [...];` for inclusion in a web page. Promotions append an
//! advisory for every source package they publish.

use crate::error::{Error, Result};
use crate::package::Package;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use strum_macros::{Display, EnumString};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const JSON_WRAPPER: &str = "advisories = ";

/// On-disk form of the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryFormat {
    #[default]
    Txt,
    Json,
}

/// One released change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub date: String,
    pub packages: Vec<String>,
    pub toolkit_version: String,
    pub flags: Vec<String>,
    pub description: String,
}

impl Advisory {
    /// Parse one text line; blank lines and comments yield `None`
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let fields: Vec<&str> = line.splitn(5, ';').collect();
        let [date, packages, version, flags, description] = fields[..] else {
            return Err(Error::ParseError(format!("advisory needs 5 fields: {}", line)));
        };
        Ok(Some(Self {
            date: date.to_string(),
            packages: split_list(packages),
            toolkit_version: version.to_string(),
            flags: split_list(flags),
            description: description.to_string(),
        }))
    }

    pub fn to_line(&self) -> String {
        format!(
            "{};{};{};{};{}",
            self.date,
            self.packages.join(" "),
            self.toolkit_version,
            self.flags.join(" "),
            self.description.replace('\n', "<br />")
        )
    }
}

fn split_list(field: &str) -> Vec<String> {
    field
        .split([',', ' '])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// All advisories plus the ones added in this run
#[derive(Debug, Clone, Default)]
pub struct AdvisoryLedger {
    advisories: Vec<Advisory>,
    added: Vec<usize>,
    added_names: BTreeSet<String>,
}

impl AdvisoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a ledger; a missing file is an empty ledger
    pub fn load(path: &Path, format: AdvisoryFormat) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No advisories at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&text, format)
    }

    pub fn parse(text: &str, format: AdvisoryFormat) -> Result<Self> {
        let advisories = match format {
            AdvisoryFormat::Txt => {
                let mut advisories = Vec::new();
                for line in text.lines() {
                    advisories.extend(Advisory::parse_line(line)?);
                }
                advisories
            }
            AdvisoryFormat::Json => {
                let body = text.trim();
                let body = body.strip_prefix(JSON_WRAPPER).unwrap_or(body);
                let body = body.trim_end_matches(';');
                serde_json::from_str(body)
                    .map_err(|e| Error::ParseError(format!("advisories JSON: {}", e)))?
            }
        };
        Ok(Self {
            advisories,
            ..Self::default()
        })
    }

    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    /// Advisories added since the ledger was loaded
    pub fn added(&self) -> Vec<&Advisory> {
        self.added.iter().map(|&i| &self.advisories[i]).collect()
    }

    /// Append one advisory per published source package, once per name
    pub fn add_promoted<'a>(
        &mut self,
        packages: impl IntoIterator<Item = &'a Package>,
        toolkit_version: &str,
    ) -> usize {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let mut count = 0;
        for pkg in packages {
            if pkg.arch != "src" || !self.added_names.insert(pkg.name.clone()) {
                continue;
            }
            let release = format!("{}-{}", pkg.name.replace('-', "_"), pkg.version.upstream());
            self.advisories.push(Advisory {
                date: date.clone(),
                packages: vec![release],
                toolkit_version: toolkit_version.to_string(),
                flags: vec!["bug".to_string()],
                description: format!("{} {} released to {}", pkg.name, pkg.version, pkg.channel),
            });
            self.added.push(self.advisories.len() - 1);
            count += 1;
        }
        count
    }

    pub fn to_text(&self) -> String {
        self.advisories.iter().map(|a| a.to_line() + "\n").collect()
    }

    pub fn new_to_text(&self) -> String {
        self.added().iter().map(|a| a.to_line() + "\n").collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.advisories)
            .map_err(|e| Error::ParseError(format!("advisories JSON: {}", e)))
    }

    /// Replace the ledger file atomically
    pub fn save(&self, path: &Path, format: AdvisoryFormat) -> Result<()> {
        let body = match format {
            AdvisoryFormat::Txt => self.to_text(),
            AdvisoryFormat::Json => self.to_json()? + "\n",
        };
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(body.as_bytes())?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        info!("Wrote {} advisories to {}", self.advisories.len(), path.display());
        Ok(())
    }
}
