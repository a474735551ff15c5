use crate::Identity;

/// A plain or materialized view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSpec {
    pub cluster: Option<String>,
    pub database: String,
    pub name: String,
    /// The SELECT statement, rendered verbatim after `AS`.
    pub query: String,
    pub materialized: bool,
    /// Target table for a materialized view. Unqualified names resolve
    /// against the view's database.
    pub to_table: Option<String>,
    pub comment: String,
}

impl ViewSpec {
    pub fn new(
        database: impl Into<String>,
        name: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn materialized(mut self, to_table: Option<&str>) -> Self {
        self.materialized = true;
        self.to_table = to_table.map(str::to_string);
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.cluster.as_deref(), &self.database, &self.name)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// The target table, qualified with the view's database if needed.
    pub fn qualified_to_table(&self) -> Option<String> {
        self.to_table.as_deref().map(|t| {
            if t.contains('.') {
                t.to_string()
            } else {
                format!("{}.{}", self.database, t)
            }
        })
    }
}
