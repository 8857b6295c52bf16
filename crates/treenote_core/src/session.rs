//! Session context for one running application instance.
//!
//! # Responsibility
//! - Own the store handle and the actor name stamped on change records.
//! - Persist per-database view state between runs.
//!
//! # Invariants
//! - Every tree opened through one session shares its actor name.
//! - Session state is an opaque JSON blob; unknown fields are ignored.

use crate::logging::normalize_level;
use crate::model::item::ItemId;
use crate::service::BOOKMARKS_COLLECTION;
use crate::store::DocumentStore;
use crate::tree::{TreeError, TreeModel, TreeResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Environment variable consulted for the default actor name.
pub const ACTOR_ENV_VAR: &str = "HOSTNAME";

#[derive(Debug)]
pub enum SessionError {
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidConfig(String),
    /// No database bookmark with that name.
    UnknownDatabase(String),
    Tree(TreeError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "session state io error: {err}"),
            Self::Json(err) => write!(f, "session state is not valid json: {err}"),
            Self::InvalidConfig(message) => write!(f, "invalid session config: {message}"),
            Self::UnknownDatabase(name) => write!(f, "database bookmark not found: {name}"),
            Self::Tree(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::Tree(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<TreeError> for SessionError {
    fn from(value: TreeError) -> Self {
        Self::Tree(value)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Startup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default = "default_level")]
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            actor: default_actor(),
            log_level: default_level(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SessionError> {
        if self.actor.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "actor must not be blank".to_string(),
            ));
        }
        normalize_level(&self.log_level)
            .map_err(|err| SessionError::InvalidConfig(err.to_string()))?;
        Ok(())
    }
}

fn default_actor() -> String {
    std::env::var(ACTOR_ENV_VAR)
        .ok()
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| format!("treenote-{}", Uuid::new_v4().simple()))
}

fn default_level() -> String {
    crate::logging::default_log_level().to_string()
}

/// Named connection to a store collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseBookmark {
    pub name: String,
    /// Replication endpoint; empty for local-only databases.
    #[serde(default)]
    pub url: String,
    pub collection: String,
}

/// View state written at shutdown and read at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub last_selected: Option<ItemId>,
    /// Name of the database bookmark shown last.
    #[serde(default)]
    pub last_database: Option<String>,
    /// Expanded item ids per database bookmark name.
    #[serde(default)]
    pub expanded: HashMap<String, Vec<ItemId>>,
    #[serde(default)]
    pub databases: Vec<DatabaseBookmark>,
}

impl SessionState {
    /// Reads state from `path`; a missing file yields the default state.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseBookmark> {
        self.databases.iter().find(|database| database.name == name)
    }

    /// Adds or replaces the bookmark with the same name.
    pub fn upsert_database(&mut self, bookmark: DatabaseBookmark) {
        match self
            .databases
            .iter_mut()
            .find(|database| database.name == bookmark.name)
        {
            Some(existing) => *existing = bookmark,
            None => self.databases.push(bookmark),
        }
    }

    pub fn remove_database(&mut self, name: &str) -> Result<DatabaseBookmark, SessionError> {
        let position = self
            .databases
            .iter()
            .position(|database| database.name == name)
            .ok_or_else(|| SessionError::UnknownDatabase(name.to_string()))?;
        self.expanded.remove(name);
        Ok(self.databases.remove(position))
    }
}

/// Explicit application context replacing global window state.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    config: SessionConfig,
    state: SessionState,
}

impl Session {
    pub fn new(store: Arc<dyn DocumentStore>, config: SessionConfig) -> Self {
        info!(
            "event=session_start module=session status=ok actor={}",
            config.actor
        );
        Self {
            store,
            config,
            state: SessionState::default(),
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn actor(&self) -> &str {
        &self.config.actor
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Opens a tree model over `collection`, creating it when missing.
    pub fn open_tree(&self, collection: &str) -> TreeResult<TreeModel> {
        TreeModel::open(Arc::clone(&self.store), collection, self.config.actor.clone())
    }

    /// Opens the tree of a named database bookmark and restores its
    /// expansion state.
    pub fn open_database(&mut self, name: &str) -> Result<TreeModel, SessionError> {
        let collection = self
            .state
            .database(name)
            .map(|database| database.collection.clone())
            .ok_or_else(|| SessionError::UnknownDatabase(name.to_string()))?;
        let mut model = self.open_tree(&collection)?;
        self.restore_expanded(name, &mut model);
        self.state.last_database = Some(name.to_string());
        Ok(model)
    }

    pub fn open_bookmarks(&self) -> TreeResult<TreeModel> {
        self.open_tree(BOOKMARKS_COLLECTION)
    }

    /// Stores the model's expanded ids under the database bookmark `name`.
    pub fn capture_expanded(&mut self, name: &str, model: &TreeModel) {
        let ids = model.expanded_ids();
        info!(
            "event=session_capture module=session status=ok database={} expanded={}",
            name,
            ids.len()
        );
        self.state.expanded.insert(name.to_string(), ids);
    }

    /// Re-applies the expanded ids saved under `name`; unknown ids are skipped.
    pub fn restore_expanded(&self, name: &str, model: &mut TreeModel) {
        match self.state.expanded.get(name) {
            Some(ids) => model.restore_expanded(ids),
            None => warn!(
                "event=session_restore module=session status=skip reason=no_state database={}",
                name
            ),
        }
    }
}
