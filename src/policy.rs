//! Generation policy
//!
//! Per-verb authorization, caching, logging, CQRS and input reactors, the
//! [`GenerationUnit`] that the synthesizer consumes, and the wire request
//! operators submit to describe one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CrudifyError;
use crate::schema::Table;

/// HTTP verb of a generated endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    #[serde(alias = "create")]
    Post,
    #[serde(alias = "read")]
    Get,
    #[serde(alias = "update")]
    Put,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 4] = [Verb::Post, Verb::Get, Verb::Put, Verb::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
        }
    }

    pub fn http_method(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    pub fn crud_action(&self) -> &'static str {
        match self {
            Self::Post => "create",
            Self::Get => "read",
            Self::Put => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL dialect of the target database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Mysql,
    Pgsql,
    Mssql,
    Sqlite,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Pgsql => "pgsql",
            Self::Mssql => "mssql",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(Self::Mysql),
            "pgsql" | "postgres" | "postgresql" => Ok(Self::Pgsql),
            "mssql" | "sqlserver" => Ok(Self::Mssql),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unsupported database type '{}'", other)),
        }
    }
}

/// Response caching for `get` endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub ttl_seconds: u32,
    #[serde(default)]
    pub public: bool,
}

/// Who receives change notifications published for a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CqrsAuthorisation {
    /// Every connected client
    None,
    /// The roles allowed to invoke the endpoint
    Inherited,
    Roles { roles: Vec<String> },
}

/// CQRS event publication, present only when it is switched on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CqrsPolicy {
    pub authorisation: CqrsAuthorisation,
}

/// What a reactor step does to the request input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorKind {
    Validate,
    Transform,
    Inject,
}

impl ReactorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Transform => "transform",
            Self::Inject => "inject",
        }
    }
}

/// One named step of an input pipeline, e.g. `validate.email(email)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reactor {
    pub kind: ReactorKind,
    pub name: String,
    pub column: Option<String>,
}

impl Reactor {
    /// Parse a pipeline of steps separated by `;` or newlines
    pub fn parse_pipeline(source: &str) -> Result<Vec<Reactor>, String> {
        source
            .split(|c: char| c == ';' || c == '\n')
            .map(str::trim)
            .filter(|step| !step.is_empty())
            .map(Reactor::from_str)
            .collect()
    }
}

impl FromStr for Reactor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let step = s.trim();
        let (head, column) = match step.find('(') {
            Some(open) => {
                let inner = step[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| format!("reactor '{}' is missing ')'", step))?
                    .trim();
                if !is_identifier(inner) {
                    return Err(format!("reactor '{}' has an invalid column argument", step));
                }
                (&step[..open], Some(inner.to_string()))
            }
            None => (step, None),
        };

        let (kind, name) = head
            .split_once('.')
            .ok_or_else(|| format!("reactor '{}' must look like <kind>.<name>", step))?;
        let kind = match kind.trim() {
            "validate" => ReactorKind::Validate,
            "transform" => ReactorKind::Transform,
            "inject" => ReactorKind::Inject,
            other => return Err(format!("unknown reactor kind '{}'", other)),
        };
        let name = name.trim();
        if !is_identifier(name) {
            return Err(format!("reactor '{}' has an invalid name", step));
        }

        Ok(Self {
            kind,
            name: name.to_string(),
            column,
        })
    }
}

impl fmt::Display for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind.as_str(), self.name)?;
        if let Some(column) = &self.column {
            write!(f, "({})", column)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Reactor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Reactor> for String {
    fn from(reactor: Reactor) -> Self {
        reactor.to_string()
    }
}

/// Policy attached to one verb of a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbPolicy {
    /// Roles allowed to invoke the endpoint; empty means public
    pub auth: Vec<String>,
    /// Minimum reCAPTCHA score
    pub captcha: Option<f64>,
    /// Message logged every time the endpoint is invoked
    pub log: Option<String>,
    pub reactors: Vec<Reactor>,
}

/// Table-level policy defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablePolicy {
    pub verbs: BTreeMap<Verb, VerbPolicy>,
    pub cache: Option<CachePolicy>,
    pub cqrs: Option<CqrsPolicy>,
}

/// Policy requested for one unit; `None` falls back to the table default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Policy {
    pub auth: Option<Vec<String>>,
    pub captcha: Option<f64>,
    pub log: Option<String>,
    pub reactors: Option<Vec<Reactor>>,
    pub cache: Option<CachePolicy>,
    pub cqrs: Option<CqrsPolicy>,
}

impl Policy {
    pub fn resolve(&self, defaults: &TablePolicy, verb: Verb) -> ResolvedPolicy {
        let verb_defaults = defaults.verbs.get(&verb).cloned().unwrap_or_default();

        ResolvedPolicy {
            auth: self.auth.clone().unwrap_or(verb_defaults.auth),
            captcha: self.captcha.or(verb_defaults.captcha),
            log: self.log.clone().or(verb_defaults.log),
            reactors: self.reactors.clone().unwrap_or(verb_defaults.reactors),
            cache: self.cache.or(defaults.cache.filter(|_| verb == Verb::Get)),
            cqrs: self.cqrs.clone().or_else(|| defaults.cqrs.clone()),
        }
    }
}

/// Policy with every table default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPolicy {
    pub auth: Vec<String>,
    pub captcha: Option<f64>,
    pub log: Option<String>,
    pub reactors: Vec<Reactor>,
    pub cache: Option<CachePolicy>,
    pub cqrs: Option<CqrsPolicy>,
}

impl ResolvedPolicy {
    /// Roles that receive CQRS events; empty means everybody
    pub fn cqrs_roles(&self) -> Option<Vec<String>> {
        self.cqrs.as_ref().map(|cqrs| match &cqrs.authorisation {
            CqrsAuthorisation::None => Vec::new(),
            CqrsAuthorisation::Inherited => self.auth.clone(),
            CqrsAuthorisation::Roles { roles } => roles.clone(),
        })
    }

    /// Check the policy against the verb and table it will be generated for
    pub fn validate(&self, target: &str, verb: Verb, table: &Table) -> Result<(), CrudifyError> {
        for role in &self.auth {
            if !is_identifier(role) {
                return Err(CrudifyError::validation(
                    target,
                    format!("'{}' is not a valid role name", role),
                ));
            }
        }

        if let Some(score) = self.captcha {
            if !(0.0..=1.0).contains(&score) {
                return Err(CrudifyError::validation(
                    target,
                    format!("captcha score {} is outside 0.0..=1.0", score),
                ));
            }
        }

        if self.cache.is_some() && verb != Verb::Get {
            return Err(CrudifyError::validation(
                target,
                format!("caching is only supported on 'get', not '{}'", verb),
            ));
        }

        if let Some(CqrsPolicy {
            authorisation: CqrsAuthorisation::Roles { roles },
        }) = &self.cqrs
        {
            if roles.is_empty() {
                return Err(CrudifyError::validation(
                    target,
                    "CQRS authorisation 'roles' needs at least one role",
                ));
            }
            if let Some(bad) = roles.iter().find(|r| !is_identifier(r)) {
                return Err(CrudifyError::validation(
                    target,
                    format!("'{}' is not a valid CQRS role name", bad),
                ));
            }
        }

        for reactor in &self.reactors {
            if let Some(column) = &reactor.column {
                if table.column(column).is_none() {
                    return Err(CrudifyError::validation(
                        target,
                        format!("reactor '{}' targets unknown column '{}'", reactor, column),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Narrowing of the default column surfaces requested by the operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSelection {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub primary: Option<Vec<String>>,
}

/// One (table, verb, policy) combination to synthesize
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationUnit {
    pub database_type: DatabaseType,
    pub module_name: String,
    pub module_url: String,
    pub database: String,
    pub table: String,
    pub verb: Verb,
    pub policy: Policy,
    pub selection: ColumnSelection,
    /// Return the generated key from `post`
    pub return_id: bool,
    pub overwrite: bool,
    pub verbose: bool,
    pub join: bool,
}

impl GenerationUnit {
    /// A unit with the module named after the database and empty policy
    pub fn new(
        database_type: DatabaseType,
        database: impl Into<String>,
        table: impl Into<String>,
        verb: Verb,
    ) -> Self {
        let database = database.into();
        Self {
            database_type,
            module_name: database.clone(),
            module_url: database.clone(),
            database,
            table: table.into(),
            verb,
            policy: Policy::default(),
            selection: ColumnSelection::default(),
            return_id: false,
            overwrite: false,
            verbose: false,
            join: false,
        }
    }

    pub fn key(&self) -> UnitKey {
        UnitKey {
            database: self.database.clone(),
            table: self.table.clone(),
            verb: self.verb,
        }
    }
}

/// Identity of a unit in reports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UnitKey {
    pub database: String,
    pub table: String,
    pub verb: Verb,
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} [{}]", self.database, self.table, self.verb)
    }
}

/// CQRS authorisation mode as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CqrsMode {
    None,
    Inherited,
    Roles,
}

/// Generation request as submitted by the operator-facing caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRequest {
    pub database_type: String,
    pub module_name: String,
    pub module_url: String,
    pub database: String,
    pub table: String,
    pub verb: Verb,
    #[serde(default)]
    pub return_id: bool,
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub captcha: Option<f64>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub cache: Option<u32>,
    #[serde(default)]
    pub public_cache: Option<bool>,
    pub overwrite: bool,
    pub verbose: bool,
    pub join: bool,
    #[serde(default)]
    pub args: ColumnSelection,
    #[serde(default)]
    pub validators: Option<String>,
    pub cqrs: bool,
    #[serde(default)]
    pub cqrs_authorisation: Option<CqrsMode>,
    #[serde(default)]
    pub cqrs_authorisation_values: Option<String>,
}

impl UnitRequest {
    pub fn key(&self) -> UnitKey {
        UnitKey {
            database: self.database.clone(),
            table: self.table.clone(),
            verb: self.verb,
        }
    }
}

impl TryFrom<UnitRequest> for GenerationUnit {
    type Error = CrudifyError;

    fn try_from(request: UnitRequest) -> Result<Self, Self::Error> {
        let target = request.key().to_string();

        let database_type = request
            .database_type
            .parse::<DatabaseType>()
            .map_err(|message| CrudifyError::validation(&target, message))?;

        let reactors = request
            .validators
            .as_deref()
            .map(Reactor::parse_pipeline)
            .transpose()
            .map_err(|message| CrudifyError::validation(&target, message))?;

        let cache = request.cache.filter(|ttl| *ttl > 0).map(|ttl_seconds| CachePolicy {
            ttl_seconds,
            public: request.public_cache.unwrap_or(false),
        });

        let cqrs = if request.cqrs {
            let authorisation = match request.cqrs_authorisation.unwrap_or(CqrsMode::None) {
                CqrsMode::None => CqrsAuthorisation::None,
                CqrsMode::Inherited => CqrsAuthorisation::Inherited,
                CqrsMode::Roles => CqrsAuthorisation::Roles {
                    roles: parse_roles(request.cqrs_authorisation_values.as_deref().unwrap_or("")),
                },
            };
            Some(CqrsPolicy { authorisation })
        } else {
            None
        };

        if request.return_id && request.verb != Verb::Post {
            warn!(unit = %target, "returnId only applies to post, ignoring");
        }

        Ok(Self {
            database_type,
            module_name: request.module_name,
            module_url: request.module_url,
            database: request.database,
            table: request.table,
            verb: request.verb,
            policy: Policy {
                auth: request.auth.as_deref().map(parse_roles),
                captcha: request.captcha,
                log: request.log.filter(|msg| !msg.trim().is_empty()),
                reactors,
                cache,
                cqrs,
            },
            selection: request.args,
            return_id: request.return_id && request.verb == Verb::Post,
            overwrite: request.overwrite,
            verbose: request.verbose,
            join: request.join,
        })
    }
}

/// Split a comma-separated role list, dropping empty entries
pub fn parse_roles(source: &str) -> Vec<String> {
    source
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

/// Database object names: `[A-Za-z_][A-Za-z0-9_]*`, optionally schema-qualified
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Module names: `[A-Za-z0-9_-]+`
pub fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Module URLs: `/`-separated lowercase segments of `[a-z0-9_-]`
pub fn is_module_url(url: &str) -> bool {
    !url.is_empty()
        && url.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        })
}
