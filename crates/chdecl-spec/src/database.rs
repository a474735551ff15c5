use crate::Identity;

/// A database to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub cluster: Option<String>,
    pub name: String,
    pub comment: String,
}

impl DatabaseSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.cluster.as_deref(), "", &self.name)
    }
}

/// A database as read back from `system.databases`.
///
/// Everything but the name and comment is computed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub engine: String,
    pub data_path: String,
    pub metadata_path: String,
    pub uuid: String,
    pub comment: String,
}
