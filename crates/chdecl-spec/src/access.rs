//! Roles, grants and users.

use std::collections::BTreeSet;
use std::fmt;

use strid::braid;

use crate::Identity;

/// The database sentinel meaning "all databases" (global privilege scope).
pub const WILDCARD_DATABASE: &str = "*";

/// A ClickHouse access type, e.g. `SELECT` or `ALTER UPDATE`.
#[braid]
pub struct AccessType;

/// A role and the privileges it holds on exactly one database scope.
///
/// `database` is either a concrete database name or [`WILDCARD_DATABASE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub database: String,
    pub privileges: BTreeSet<AccessType>,
}

impl RoleSpec {
    pub fn new(name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            privileges: BTreeSet::new(),
        }
    }

    pub fn privilege(mut self, access: impl Into<String>) -> Self {
        self.privileges.insert(AccessType::new(access.into()));
        self
    }

    pub fn privileges<I, S>(mut self, access: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privileges
            .extend(access.into_iter().map(|a| AccessType::new(a.into())));
        self
    }

    /// True when the role is scoped to all databases.
    pub fn is_global(&self) -> bool {
        self.database == WILDCARD_DATABASE
    }

    pub fn identity(&self) -> Identity {
        Identity::new(None, "", &self.name)
    }

    /// Compose a role from observed grants.
    ///
    /// Global grants (no database) do not pin the scope. Grants on two
    /// different concrete databases cannot be represented and are rejected.
    /// When there are no grants at all, `fallback_database` is used.
    pub fn from_grants(
        name: &str,
        grants: &[Grant],
        fallback_database: Option<&str>,
    ) -> Result<Self, MixedDatabases> {
        let mut database: Option<&str> = None;
        for grant in grants {
            let Some(db) = grant.database.as_deref() else {
                continue;
            };
            match database {
                Some(existing) if existing != db => {
                    return Err(MixedDatabases {
                        role: name.to_string(),
                        first: existing.to_string(),
                        second: db.to_string(),
                    });
                }
                _ => database = Some(db),
            }
        }

        let database = match database {
            Some(db) => db.to_string(),
            None if !grants.is_empty() => WILDCARD_DATABASE.to_string(),
            None => fallback_database.unwrap_or(WILDCARD_DATABASE).to_string(),
        };

        Ok(Self {
            name: name.to_string(),
            database,
            privileges: grants.iter().map(|g| g.access_type.clone()).collect(),
        })
    }
}

/// A role's grants span more than one concrete database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedDatabases {
    pub role: String,
    pub first: String,
    pub second: String,
}

impl fmt::Display for MixedDatabases {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "role {} has privileges on different databases: {} and {}",
            self.role, self.first, self.second
        )
    }
}

impl std::error::Error for MixedDatabases {}

/// One row of observed grant state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grant {
    pub role_name: String,
    pub access_type: AccessType,
    /// `None` for a global grant (`ON *.*`).
    pub database: Option<String>,
}

impl Grant {
    pub fn new(role_name: &str, access_type: &str, database: Option<&str>) -> Self {
        Self {
            role_name: role_name.to_string(),
            access_type: AccessType::new(access_type.to_string()),
            database: database.map(str::to_string),
        }
    }

    /// The database this grant applies to, `*` for global grants.
    pub fn scope(&self) -> &str {
        self.database.as_deref().unwrap_or(WILDCARD_DATABASE)
    }
}

/// A role as read back from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedRole {
    pub name: String,
    pub grants: Vec<Grant>,
}

impl ObservedRole {
    /// The privileges held on exactly `database`, and every grant held on
    /// some other scope.
    pub fn split_scope(&self, database: &str) -> (BTreeSet<AccessType>, Vec<&Grant>) {
        let (in_scope, elsewhere): (Vec<&Grant>, Vec<&Grant>) =
            self.grants.iter().partition(|g| g.scope() == database);
        let privileges = in_scope.into_iter().map(|g| g.access_type.clone()).collect();
        (privileges, elsewhere)
    }
}

/// A user and the roles it should have by default.
///
/// The password is write-only: it is embedded in creation statements and
/// never read back from the server.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub password: String,
    pub roles: BTreeSet<String>,
}

impl UserSpec {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(None, "", &self.name)
    }
}

impl fmt::Debug for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSpec")
            .field("name", &self.name)
            .field("password", &"***")
            .field("roles", &self.roles)
            .finish()
    }
}

/// A user as read back from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedUser {
    pub name: String,
    pub default_roles: BTreeSet<String>,
}
