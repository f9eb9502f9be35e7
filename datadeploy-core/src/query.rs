//! Retrieval query construction.
//!
//! [`build_query`] turns a job's retrieve settings into a structured [`Query`]
//! bound to a connection. The query is handed to the connection as data;
//! [`Query::to_soql`] renders it as query text for transports that need it.
//! Records come back as a lazy, paginated stream that is consumed exactly once.

use std::fmt::Write as _;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::config::JobConfig;
use crate::contract::{Connection, Record};
use crate::error::DataDeployError;

/// Which fields to project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    All,
    Fields(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    /// A leading `-` sorts descending.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                direction: SortDirection::Descending,
            },
            None => Self {
                field: raw.trim_start_matches('+').to_string(),
                direction: SortDirection::Ascending,
            },
        }
    }
}

/// Structured query against one entity. Absent clauses mean no constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity_name: String,
    pub fields: FieldSelection,
    pub filter: Option<Value>,
    pub sort: Option<Vec<SortField>>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn from_job(job: &JobConfig) -> Self {
        let retrieve = job.retrieve_config.clone().unwrap_or_default();
        let fields = match retrieve.include_fields {
            Some(fields) if !fields.is_empty() => FieldSelection::Fields(fields),
            _ => FieldSelection::All,
        };
        Self {
            entity_name: job.entity_name.clone(),
            fields,
            filter: retrieve.filter_criteria,
            sort: retrieve
                .sort_fields
                .map(|fields| fields.iter().map(|s| SortField::parse(s)).collect()),
            limit: retrieve.max_record_count,
        }
    }

    /// Renders the query, using `FIELDS(ALL)` when every field is requested.
    pub fn to_soql(&self) -> Result<String, DataDeployError> {
        let projection = match &self.fields {
            FieldSelection::All => "FIELDS(ALL)".to_string(),
            FieldSelection::Fields(fields) => fields.join(", "),
        };
        self.render(&projection)
    }

    /// Renders the query with an explicit field list, e.g. one obtained by
    /// describing the entity when every field is requested.
    pub fn render_with_fields(&self, fields: &[String]) -> Result<String, DataDeployError> {
        if fields.is_empty() {
            return Err(DataDeployError::InvalidQuery(format!(
                "no fields to select from {}",
                self.entity_name
            )));
        }
        self.render(&fields.join(", "))
    }

    fn render(&self, projection: &str) -> Result<String, DataDeployError> {
        let mut soql = format!("SELECT {projection} FROM {}", self.entity_name);

        if let Some(filter) = &self.filter {
            let condition = render_condition(filter)?;
            if !condition.is_empty() {
                let _ = write!(soql, " WHERE {condition}");
            }
        }

        if let Some(sort) = self.sort.as_ref().filter(|s| !s.is_empty()) {
            let order: Vec<String> = sort
                .iter()
                .map(|s| match s.direction {
                    SortDirection::Ascending => format!("{} ASC", s.field),
                    SortDirection::Descending => format!("{} DESC", s.field),
                })
                .collect();
            let _ = write!(soql, " ORDER BY {}", order.join(", "));
        }

        if let Some(limit) = self.limit {
            let _ = write!(soql, " LIMIT {limit}");
        }

        Ok(soql)
    }
}

/// A query bound to the connection that will execute it.
pub struct RecordQuery<'c, C: ?Sized> {
    connection: &'c C,
    query: Query,
}

/// Builds the retrieval query for a job.
pub fn build_query<'c, C>(connection: &'c C, job: &JobConfig) -> RecordQuery<'c, C>
where
    C: Connection + ?Sized,
{
    let query = Query::from_job(job);
    debug!(entity = %job.entity_name, ?query, "[QUERY] Built retrieval query");
    RecordQuery { connection, query }
}

enum Cursor {
    Start(Query),
    Next(String),
    Done,
}

impl<'c, C> RecordQuery<'c, C>
where
    C: Connection + ?Sized,
{
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Streams raw records page by page. Consumes the query: one pass only.
    pub fn records(self) -> BoxStream<'c, Result<Record, DataDeployError>> {
        let connection = self.connection;
        let entity = self.query.entity_name.clone();

        stream::try_unfold(Cursor::Start(self.query), move |cursor| {
            let entity = entity.clone();
            async move {
                let fetched = match cursor {
                    Cursor::Start(query) => {
                        info!(entity = %entity, "[QUERY] Executing query");
                        connection.query(&query).await
                    }
                    Cursor::Next(locator) => {
                        debug!(entity = %entity, locator = %locator, "[QUERY] Fetching next page");
                        connection.query_more(&locator).await
                    }
                    Cursor::Done => return Ok::<_, DataDeployError>(None),
                };
                let page = match fetched {
                    Ok(page) => page,
                    Err(e) => {
                        error!(entity = %entity, error = %e, "[QUERY] Query failed");
                        return Err(DataDeployError::Query {
                            entity,
                            message: e.to_string(),
                        });
                    }
                };

                debug!(entity = %entity, records = page.records.len(), "[QUERY] Received page");
                let next = match page.next_records_locator {
                    Some(locator) => Cursor::Next(locator),
                    None => Cursor::Done,
                };
                Ok(Some((page.records, next)))
            }
        })
        .map_ok(|records| stream::iter(records.into_iter().map(Ok::<Record, DataDeployError>)))
        .try_flatten()
        .boxed()
    }
}

fn render_condition(filter: &Value) -> Result<String, DataDeployError> {
    match filter {
        Value::Object(map) => render_and(map),
        other => Err(DataDeployError::InvalidQuery(format!(
            "filter criteria must be an object, got {other}"
        ))),
    }
}

fn render_and(map: &Map<String, Value>) -> Result<String, DataDeployError> {
    let parts = map
        .iter()
        .map(|(key, value)| render_entry(key, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(join_conditions(parts, "AND"))
}

fn render_entry(key: &str, value: &Value) -> Result<String, DataDeployError> {
    match key {
        "$and" | "$or" => {
            let items = value.as_array().ok_or_else(|| {
                DataDeployError::InvalidQuery(format!("{key} expects an array of conditions"))
            })?;
            let parts = items
                .iter()
                .map(render_condition)
                .collect::<Result<Vec<_>, _>>()?;
            let joiner = if key == "$and" { "AND" } else { "OR" };
            Ok(join_conditions(parts, joiner))
        }
        "$not" => Ok(format!("(NOT {})", render_condition(value)?)),
        op if op.starts_with('$') => Err(DataDeployError::InvalidQuery(format!(
            "unsupported logical operator {op}"
        ))),
        field => render_field(field, value),
    }
}

fn render_field(field: &str, value: &Value) -> Result<String, DataDeployError> {
    match value {
        Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
            let parts = ops
                .iter()
                .map(|(op, operand)| render_operator(field, op, operand))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(join_conditions(parts, "AND"))
        }
        Value::Array(_) => render_operator(field, "$in", value),
        other => render_operator(field, "$eq", other),
    }
}

fn render_operator(field: &str, op: &str, operand: &Value) -> Result<String, DataDeployError> {
    let comparison = |sym: &str| -> Result<String, DataDeployError> {
        Ok(format!("{field} {sym} {}", render_literal(operand)?))
    };
    match op {
        "$eq" => comparison("="),
        "$ne" => comparison("!="),
        "$lt" => comparison("<"),
        "$lte" => comparison("<="),
        "$gt" => comparison(">"),
        "$gte" => comparison(">="),
        "$like" => comparison("LIKE"),
        "$nlike" => Ok(format!("(NOT {field} LIKE {})", render_literal(operand)?)),
        "$in" => Ok(format!("{field} IN {}", render_list(op, operand)?)),
        "$nin" => Ok(format!("{field} NOT IN {}", render_list(op, operand)?)),
        "$includes" => Ok(format!("{field} INCLUDES {}", render_list(op, operand)?)),
        "$excludes" => Ok(format!("{field} EXCLUDES {}", render_list(op, operand)?)),
        "$exists" => match operand.as_bool() {
            Some(true) => Ok(format!("{field} != null")),
            Some(false) => Ok(format!("{field} = null")),
            None => Err(DataDeployError::InvalidQuery(format!(
                "$exists on {field} expects a boolean"
            ))),
        },
        other => Err(DataDeployError::InvalidQuery(format!(
            "unsupported operator {other} on {field}"
        ))),
    }
}

fn render_list(op: &str, operand: &Value) -> Result<String, DataDeployError> {
    let items = operand
        .as_array()
        .ok_or_else(|| DataDeployError::InvalidQuery(format!("{op} expects an array")))?;
    let literals = items
        .iter()
        .map(render_literal)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", literals.join(", ")))
}

fn render_literal(value: &Value) -> Result<String, DataDeployError> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!("'{}'", escape_string(s))),
        other => Err(DataDeployError::InvalidQuery(format!(
            "cannot use {other} as a literal"
        ))),
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn join_conditions(parts: Vec<String>, joiner: &str) -> String {
    match parts.len() {
        0 => String::new(),
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => format!("({})", parts.join(&format!(" {joiner} "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobRetrieveConfig;
    use serde_json::json;

    fn job(retrieve: Option<JobRetrieveConfig>) -> JobConfig {
        JobConfig {
            entity_name: "Account".into(),
            data_file_name: "Account.json".into(),
            deploy_config: None,
            retrieve_config: retrieve,
        }
    }

    #[test]
    fn absent_clauses_mean_no_constraint() {
        let query = Query::from_job(&job(None));
        assert_eq!(query.fields, FieldSelection::All);
        assert_eq!(query.filter, None);
        assert_eq!(query.sort, None);
        assert_eq!(query.limit, None);
        assert_eq!(query.to_soql().unwrap(), "SELECT FIELDS(ALL) FROM Account");
    }

    #[test]
    fn renders_projection_filter_sort_and_limit() {
        let query = Query::from_job(&job(Some(JobRetrieveConfig {
            include_fields: Some(vec!["Name".into(), "Industry".into()]),
            filter_criteria: Some(json!({
                "Industry": "Energy",
                "AnnualRevenue": {"$gte": 1000, "$lt": 5000}
            })),
            sort_fields: Some(vec!["Name".into(), "-CreatedDate".into()]),
            max_record_count: Some(50),
            ..Default::default()
        })));
        assert_eq!(
            query.to_soql().unwrap(),
            "SELECT Name, Industry FROM Account \
             WHERE (Industry = 'Energy' AND (AnnualRevenue >= 1000 AND AnnualRevenue < 5000)) \
             ORDER BY Name ASC, CreatedDate DESC LIMIT 50"
        );
    }

    #[test]
    fn renders_logical_and_list_operators() {
        let filter = json!({
            "$or": [
                {"Type": ["Customer", "Partner"]},
                {"Name": {"$like": "O'Brien%"}},
                {"ParentId": {"$exists": false}}
            ]
        });
        assert_eq!(
            render_condition(&filter).unwrap(),
            "(Type IN ('Customer', 'Partner') OR Name LIKE 'O\\'Brien%' OR ParentId = null)"
        );
    }

    #[test]
    fn unsupported_operators_are_rejected() {
        let err = render_condition(&json!({"Name": {"$regex": "A.*"}})).unwrap_err();
        assert!(matches!(err, DataDeployError::InvalidQuery(_)));
    }

    #[test]
    fn explicit_field_list_replaces_all_fields() {
        let query = Query::from_job(&job(None));
        assert_eq!(
            query
                .render_with_fields(&["Id".to_string(), "Name".to_string()])
                .unwrap(),
            "SELECT Id, Name FROM Account"
        );
        assert!(query.render_with_fields(&[]).is_err());
    }
}
