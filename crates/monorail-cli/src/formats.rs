//! Output serialization for `ls` - standalone helpers over a simple
//! package -> version map

use std::collections::BTreeMap;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
    Toml,
    Xml,
    Csv,
}

/// Render the package -> version map in the requested format.
pub fn render(format: OutputFormat, versions: &BTreeMap<String, String>) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(versions)?,
        OutputFormat::Yaml => serde_yaml::to_string(versions)?,
        OutputFormat::Toml => {
            #[derive(Serialize)]
            struct VersionEntry<'a> {
                version: &'a str,
            }
            let tables: BTreeMap<&str, VersionEntry<'_>> = versions
                .iter()
                .map(|(name, version)| (name.as_str(), VersionEntry { version }))
                .collect();
            toml::to_string(&tables)?
        }
        OutputFormat::Xml => to_xml(versions),
        OutputFormat::Csv => to_csv(versions),
    })
}

fn to_xml(versions: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<packages>\n");
    for (name, version) in versions {
        xml.push_str(&format!(
            "  <package>\n    <name>{name}</name>\n    <version>{version}</version>\n  </package>\n"
        ));
    }
    xml.push_str("</packages>");
    xml
}

fn to_csv(versions: &BTreeMap<String, String>) -> String {
    let mut csv = String::from("package,version");
    for (name, version) in versions {
        csv.push_str(&format!("\n{name},{version}"));
    }
    csv
}
