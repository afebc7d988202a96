//! Build machine OS detection from `/etc/os-release`

use crate::error::KcacheResult;
use crate::target::executor::RemoteExecutor;

const OS_RELEASE: &str = "/etc/os-release";

/// Parsed `/etc/os-release`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsInfo {
    pub id: String,
    pub id_like: Vec<String>,
    pub pretty_name: Option<String>,
}

impl OsInfo {
    /// Parse the `KEY=value` lines of an os-release file
    pub fn parse(content: &str) -> Self {
        let mut info = Self::default();
        for line in content.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key {
                "ID" => info.id = value.to_lowercase(),
                "ID_LIKE" => {
                    info.id_like = value.split_whitespace().map(str::to_lowercase).collect()
                }
                "PRETTY_NAME" if !value.is_empty() => info.pretty_name = Some(value.to_string()),
                _ => {}
            }
        }
        info
    }

    /// Read the target's os-release; empty info when it is missing
    pub async fn detect(executor: &dyn RemoteExecutor) -> KcacheResult<Self> {
        Ok(executor
            .read_file(OS_RELEASE)
            .await?
            .map(|content| Self::parse(&content))
            .unwrap_or_default())
    }

    /// Whether dpkg and apt are expected to be present
    pub fn is_debian_family(&self) -> bool {
        let family = |id: &str| id == "debian" || id == "ubuntu";
        family(&self.id) || self.id_like.iter().any(|id| family(id))
    }

    /// Human-readable OS name, `"unknown"` when not reported
    pub fn describe(&self) -> String {
        match (&self.pretty_name, self.id.is_empty()) {
            (Some(name), _) => name.clone(),
            (None, false) => self.id.clone(),
            (None, true) => "unknown".to_string(),
        }
    }
}
