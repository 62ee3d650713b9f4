//! Read-only view over the collection data store.
//!
//! The real store lives outside this crate; the pipeline only needs the
//! query surface captured by [`CollectStore`]. [`MemoryStore`] implements it
//! over a deserialized project snapshot and backs both the CLI and tests.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Project {
    pub number: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lang_code: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Session {
    pub id: i64,
    /// Directory name, the stable session identifier across runs.
    pub name: String,
    pub pin: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub abandoned: bool,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub script_number: Option<i64>,
    /// Header name to recorded values, one entry per device log key. The
    /// `ips` entry feeds the geolocation merge.
    #[serde(default)]
    pub device_info: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Prompt {
    #[serde(default)]
    pub attributes: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub prompt_type: String,
    #[serde(default)]
    pub corpus_code: Option<String>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatRecord {
    #[serde(default)]
    pub created: String,
    pub json: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectUser {
    pub id: i64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserAttribute {
    pub user_id: i64,
    pub attribute_id: i64,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputField {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputPromptDef {
    pub corpus_code: String,
    #[serde(default)]
    pub inputs: Vec<InputField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub session: Session,
    #[serde(default)]
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatEntry {
    pub path: String,
    #[serde(flatten)]
    pub stat: StatRecord,
}

/// Serialized project dump: everything one report run reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    #[serde(default)]
    pub sessions: Vec<SessionSnapshot>,
    #[serde(default)]
    pub stats: Vec<StatEntry>,
    #[serde(default)]
    pub users: Vec<ConnectUser>,
    #[serde(default)]
    pub user_attributes: Vec<UserAttribute>,
    #[serde(default)]
    pub input_prompts: Vec<InputPromptDef>,
}

pub trait CollectStore: Send + Sync {
    fn project(&self) -> &Project;
    fn sessions(&self) -> &[Session];
    fn files_for(&self, session_id: i64) -> &[FileRecord];
    /// Most recent stat blob recorded for a file path, newest creation first.
    fn latest_stat(&self, path: &str) -> Option<&StatRecord>;
    fn connect_user(&self, id: i64) -> Option<&ConnectUser>;
    fn user_attribute(&self, user_id: i64, attribute_id: i64) -> Option<&str>;
    fn input_prompts(&self) -> &[InputPromptDef];
}

pub struct MemoryStore {
    project: Project,
    sessions: Vec<Session>,
    files: HashMap<i64, Vec<FileRecord>>,
    stats: HashMap<String, Vec<StatRecord>>,
    users: HashMap<i64, ConnectUser>,
    user_attributes: HashMap<(i64, i64), String>,
    input_prompts: Vec<InputPromptDef>,
}

impl MemoryStore {
    pub fn from_snapshot(snapshot: ProjectSnapshot) -> Self {
        let mut sessions = Vec::with_capacity(snapshot.sessions.len());
        let mut files = HashMap::new();
        for entry in snapshot.sessions {
            files.insert(entry.session.id, entry.files);
            sessions.push(entry.session);
        }
        let mut stats: HashMap<String, Vec<StatRecord>> = HashMap::new();
        for entry in snapshot.stats {
            stats.entry(entry.path).or_default().push(entry.stat);
        }
        for versions in stats.values_mut() {
            versions.sort_by(|a, b| b.created.cmp(&a.created));
        }
        let users = snapshot.users.into_iter().map(|user| (user.id, user)).collect();
        let user_attributes = snapshot
            .user_attributes
            .into_iter()
            .map(|attr| ((attr.user_id, attr.attribute_id), attr.value))
            .collect();
        Self {
            project: snapshot.project,
            sessions,
            files,
            stats,
            users,
            user_attributes,
            input_prompts: snapshot.input_prompts,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let snapshot: ProjectSnapshot = serde_json::from_str(&raw)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

impl CollectStore for MemoryStore {
    fn project(&self) -> &Project {
        &self.project
    }

    fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    fn files_for(&self, session_id: i64) -> &[FileRecord] {
        self.files.get(&session_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn latest_stat(&self, path: &str) -> Option<&StatRecord> {
        self.stats.get(path).and_then(|versions| versions.first())
    }

    fn connect_user(&self, id: i64) -> Option<&ConnectUser> {
        self.users.get(&id)
    }

    fn user_attribute(&self, user_id: i64, attribute_id: i64) -> Option<&str> {
        self.user_attributes
            .get(&(user_id, attribute_id))
            .map(String::as_str)
    }

    fn input_prompts(&self) -> &[InputPromptDef] {
        &self.input_prompts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_deserializes_with_flattened_sessions() {
        let raw = json!({
            "project": {"number": 9716, "name": "amr", "description": "collect", "lang_code": "en-US"},
            "sessions": [{
                "id": 1,
                "name": "sess_0001",
                "pin": "pin-42",
                "completed": true,
                "files": [{"path": "/data/a.wav", "prompt_type": "recording"}]
            }],
            "stats": [{"path": "/data/a.wav", "created": "2024-01-01T00:00:00", "json": {"snr": 12}}]
        });
        let snapshot: ProjectSnapshot = serde_json::from_value(raw).unwrap();
        let store = MemoryStore::from_snapshot(snapshot);
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.files_for(1).len(), 1);
        assert!(store.files_for(99).is_empty());
        assert_eq!(store.latest_stat("/data/a.wav").unwrap().json["snr"], json!(12));
    }

    #[test]
    fn latest_stat_prefers_newest_creation() {
        let snapshot = ProjectSnapshot {
            project: Project {
                number: 1,
                name: "p".into(),
                description: String::new(),
                lang_code: String::new(),
            },
            sessions: vec![],
            stats: vec![
                StatEntry {
                    path: "/data/a.wav".into(),
                    stat: StatRecord { created: "2024-01-01".into(), json: json!({"v": 1}) },
                },
                StatEntry {
                    path: "/data/a.wav".into(),
                    stat: StatRecord { created: "2024-03-01".into(), json: json!({"v": 2}) },
                },
            ],
            users: vec![],
            user_attributes: vec![],
            input_prompts: vec![],
        };
        let store = MemoryStore::from_snapshot(snapshot);
        assert_eq!(store.latest_stat("/data/a.wav").unwrap().json["v"], json!(2));
    }
}
