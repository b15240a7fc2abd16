//! # Built-in Routes
//!
//! Data browsing and role management, declared as ordinary route specs in the
//! PostgreSQL dialect. What a caller may do through them is decided by the
//! database, exactly as for declared routes. Data mutations and role creation
//! answer `{"message": "OK"}`; dropping a role and granting return the last
//! statement's rows.
//!
//! | Method | Path | Effect |
//! |--------|------|--------|
//! | GET | `/_data/` | databases |
//! | GET | `/_data/{database}` | schemas |
//! | GET | `/_data/{database}/{schema}` | tables |
//! | GET | `/_data/{database}/{schema}/{table}` | rows |
//! | POST | `/_data/{database}/{schema}/{table}` | insert the body as a row |
//! | PUT | `/_data/{database}/{schema}/{table}` | create a table from `{column: type}` |
//! | DELETE | `/_data/{database}/{schema}/{table}` | drop the table, then the view |
//! | GET | `/_roles/` | table grants |
//! | PUT | `/_roles/` | create a role with credentials |
//! | GET | `/_roles/{username}` | grants of one role |
//! | DELETE | `/_roles/{username}` | drop a role and its credentials |
//! | PUT | `/_roles/{username}/{table}/{action}` | grant `action` on `table` |

use axum::http::Method;

use super::errors::RouteResult;
use super::table::RouteEntry;
use crate::query::{
    BodyDescriptor, ParamLocation, ParameterDescriptor, ResponseKind, RouteQuerySpec,
    StatementTemplate,
};

const QUALIFIED_TABLE: &str = "{{database}}.{{schema}}.{{table}}";

const GRANTS: &str = "SELECT DISTINCT grantee AS subj, table_name AS obj, privilege_type AS act \
                      FROM information_schema.role_table_grants";

/// Every built-in route; `user_table` must already be a valid identifier
pub fn all(user_table: &str) -> RouteResult<Vec<RouteEntry>> {
    let mut entries = data_routes()?;
    entries.extend(role_routes(user_table)?);
    Ok(entries)
}

/// `/_data` routes
pub fn data_routes() -> RouteResult<Vec<RouteEntry>> {
    let table_params = || {
        vec![
            path("database", true),
            path("schema", true),
            path("table", true),
        ]
    };

    Ok(vec![
        route(
            Method::GET,
            "/_data/",
            &["SELECT DISTINCT datname FROM pg_database WHERE datistemplate = false"],
            vec![],
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
        route(
            Method::GET,
            "/_data/{database}",
            &["SELECT DISTINCT table_schema FROM information_schema.tables"],
            vec![path("database", false)],
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
        route(
            Method::GET,
            "/_data/{database}/{schema}",
            &["SELECT DISTINCT table_name FROM information_schema.tables WHERE table_schema = :schema"],
            vec![path("database", false), path("schema", false)],
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
        route(
            Method::GET,
            "/_data/{database}/{schema}/{table}",
            &[&format!("SELECT * FROM {}", QUALIFIED_TABLE)],
            table_params(),
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
        route(
            Method::POST,
            "/_data/{database}/{schema}/{table}",
            &[&format!(
                "INSERT INTO {} ({{{{#each body}}}}{{{{@key}}}}{{{{/each}}}}) \
                 VALUES ({{{{#each body}}}}:{{{{@key}}}}{{{{/each}}}})",
                QUALIFIED_TABLE
            )],
            table_params(),
            BodyDescriptor::Keys,
            ResponseKind::Acknowledge,
        )?,
        route(
            Method::PUT,
            "/_data/{database}/{schema}/{table}",
            &[&format!(
                "CREATE TABLE {} ({{{{#each body}}}}{{{{@key}}}} {{{{@value}}}}{{{{/each}}}})",
                QUALIFIED_TABLE
            )],
            table_params(),
            BodyDescriptor::Full,
            ResponseKind::Acknowledge,
        )?,
        route(
            Method::DELETE,
            "/_data/{database}/{schema}/{table}",
            &[
                &format!("DROP TABLE IF EXISTS {}", QUALIFIED_TABLE),
                &format!("DROP VIEW IF EXISTS {}", QUALIFIED_TABLE),
            ],
            table_params(),
            BodyDescriptor::Hidden,
            ResponseKind::Acknowledge,
        )?,
    ])
}

/// `/_roles` routes; credentials live in `user_table`
pub fn role_routes(user_table: &str) -> RouteResult<Vec<RouteEntry>> {
    Ok(vec![
        route(
            Method::GET,
            "/_roles/",
            &[GRANTS],
            vec![],
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
        route(
            Method::PUT,
            "/_roles/",
            &[
                "CREATE ROLE {{username}}",
                &format!(
                    "INSERT INTO {} VALUES (:username, crypt(:password, gen_salt('bf', 8)))",
                    user_table
                ),
            ],
            vec![
                ParameterDescriptor::new("username", ParamLocation::Body, true),
                ParameterDescriptor::new("password", ParamLocation::Body, false),
            ],
            BodyDescriptor::Hidden,
            ResponseKind::Acknowledge,
        )?,
        route(
            Method::GET,
            "/_roles/{username}",
            &[&format!("{} WHERE grantee = :username", GRANTS)],
            vec![path("username", false)],
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
        route(
            Method::DELETE,
            "/_roles/{username}",
            &[
                "DROP OWNED BY {{username}}",
                "DROP ROLE {{username}}",
                &format!("DELETE FROM {} WHERE username = :username", user_table),
            ],
            vec![path("username", true)],
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
        route(
            Method::PUT,
            "/_roles/{username}/{table}/{action}",
            &["GRANT {{action}} ON TABLE {{table}} TO {{username}}"],
            vec![path("username", true), path("table", true), path("action", true)],
            BodyDescriptor::Hidden,
            ResponseKind::Rows,
        )?,
    ])
}

fn path(name: &str, template_allowed: bool) -> ParameterDescriptor {
    ParameterDescriptor::new(name, ParamLocation::Path, template_allowed)
}

fn route(
    method: Method,
    pattern: &str,
    statements: &[&str],
    params: Vec<ParameterDescriptor>,
    body: BodyDescriptor,
    response: ResponseKind,
) -> RouteResult<RouteEntry> {
    let location = format!("{} {}", method, pattern);
    let statements = statements
        .iter()
        .enumerate()
        .map(|(index, sql)| StatementTemplate::compile(format!("{} {}", location, index), sql))
        .collect::<Result<Vec<_>, _>>()?;
    let spec = RouteQuerySpec::new(&location, statements, params, body)?.with_response(response);
    Ok(RouteEntry::new(method, pattern, spec))
}
