//! Rows of the `modules` and `translations` tables and the values written into them.

/// Representation of a store module entry (row) in the database.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct StoreModule {
    pub(crate) id: i64,
    /// Stable slug identifying the module
    pub(crate) code: String,
    /// Latest saved version
    pub(crate) version: String,
    /// Publish flag
    pub(crate) status: bool,
    /// The date and time when the module was first saved
    pub(crate) created_at: chrono::DateTime<chrono::Utc>,
}

/// Representation of a translation entry (row) in the database.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct StoreTranslation {
    pub(crate) code: String,
    pub(crate) language_code: String,
    pub(crate) title: String,
    pub(crate) description: String,
}

/// A module row joined with its translation for one language, if there is one.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub(crate) struct StoreLocalizedModule {
    pub(crate) id: i64,
    pub(crate) code: String,
    pub(crate) version: String,
    pub(crate) status: bool,
    pub(crate) title: Option<String>,
    pub(crate) description: Option<String>,
}

/// Values written by a single module upsert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StoreModuleUpsert {
    pub(crate) code: String,
    pub(crate) version: String,
    /// New publish flag. `None` keeps the flag of an existing row and unpublishes new rows.
    pub(crate) status: Option<bool>,
    pub(crate) translations: Vec<StoreTranslation>,
    /// Creation date used if the row does not exist yet
    pub(crate) date: chrono::DateTime<chrono::Utc>,
}

impl StoreModuleUpsert {
    pub(crate) fn new(
        code: String,
        version: String,
        status: Option<bool>,
        translations: Vec<StoreTranslation>,
        date: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        StoreModuleUpsert {
            code,
            version,
            status,
            translations,
            date,
        }
    }
}
