use anyhow::bail;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{PgPool, Postgres, Row};

use super::store::{Direction, DocumentStore, FieldUpdate, Guard, Query, Update};

#[derive(Clone, Debug, PartialEq)]
enum Bind {
    Text(String),
    Int(i64),
    Json(Value),
}

/// Collects bind values and hands out their positional placeholders.
#[derive(Default)]
struct Binds {
    values: Vec<Bind>,
}

impl Binds {
    fn push(&mut self, bind: Bind) -> String {
        self.values.push(bind);
        format!("${}", self.values.len())
    }

    fn text(&mut self, value: &str) -> String {
        format!("{}::text", self.push(Bind::Text(value.to_string())))
    }

    fn int(&mut self, value: i64) -> String {
        format!("{}::bigint", self.push(Bind::Int(value)))
    }

    fn json(&mut self, value: &Value) -> String {
        format!("COALESCE({}::jsonb, 'null'::jsonb)", self.push(Bind::Json(value.clone())))
    }
}

fn build_update(collection: &str, id: &str, update: &Update) -> (String, Vec<Bind>) {
    let mut binds = Binds::default();
    let collection = binds.text(collection);
    let id = binds.text(id);

    let mut expression = "data".to_string();
    for field in &update.fields {
        expression = match field {
            FieldUpdate::Set(name, value) => {
                let name = binds.text(name);
                let value = binds.json(value);
                format!("jsonb_set({expression}, ARRAY[{name}], {value}, true)")
            }
            FieldUpdate::Increment(name, by) => {
                let name = binds.text(name);
                let by = binds.int(*by);
                format!(
                    "jsonb_set({expression}, ARRAY[{name}], \
                     to_jsonb(COALESCE((data->>{name})::bigint, 0) + {by}), true)"
                )
            }
            FieldUpdate::ArrayUnion(name, value) => {
                let name = binds.text(name);
                let value = binds.json(value);
                let current = format!("COALESCE(data->{name}, '[]'::jsonb)");
                format!(
                    "jsonb_set({expression}, ARRAY[{name}], \
                     CASE WHEN {current} @> jsonb_build_array({value}) THEN {current} \
                     ELSE {current} || jsonb_build_array({value}) END, true)"
                )
            }
            FieldUpdate::ArrayRemove(name, value) => {
                let name = binds.text(name);
                let value = binds.json(value);
                format!(
                    "jsonb_set({expression}, ARRAY[{name}], \
                     COALESCE((SELECT jsonb_agg(item) FROM \
                     jsonb_array_elements(COALESCE(data->{name}, '[]'::jsonb)) AS item \
                     WHERE item <> {value}), '[]'::jsonb), true)"
                )
            }
        };
    }

    let mut conditions = vec![format!("collection = {collection}"), format!("id = {id}")];
    for guard in &update.guards {
        conditions.push(match guard {
            Guard::AtLeast(name, minimum) => {
                let name = binds.text(name);
                let minimum = binds.int(*minimum);
                format!("COALESCE((data->>{name})::bigint, 0) >= {minimum}")
            }
            Guard::OneOf(name, allowed) => {
                let name = binds.text(name);
                let allowed = binds.json(&Value::Array(allowed.clone()));
                format!("{allowed} @> jsonb_build_array(COALESCE(data->{name}, 'null'::jsonb))")
            }
            Guard::NotContains(name, value) => {
                let name = binds.text(name);
                let value = binds.json(value);
                format!("NOT (COALESCE(data->{name}, '[]'::jsonb) @> jsonb_build_array({value}))")
            }
        });
    }

    let sql = format!(
        "UPDATE documents SET data = {} WHERE {} RETURNING data",
        expression,
        conditions.join(" AND ")
    );

    (sql, binds.values)
}

fn build_query(collection: &str, query: &Query) -> (String, Vec<Bind>) {
    let mut binds = Binds::default();
    let collection = binds.text(collection);
    let mut sql = format!("SELECT data FROM documents WHERE collection = {collection}");

    if !query.filters.is_empty() {
        let filters: Map<String, Value> = query.filters.iter().cloned().collect();
        let filters = binds.json(&Value::Object(filters));
        sql.push_str(&format!(" AND data @> {filters}"));
    }

    match &query.order_by {
        Some((field, direction)) => {
            let field = binds.text(field);
            let direction = match direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY data->{field} {direction}, seq {direction}"
            ));
        }
        None => sql.push_str(" ORDER BY seq ASC"),
    }

    if let Some(limit) = query.limit {
        let limit = binds.int(limit as i64);
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    (sql, binds.values)
}

fn bind_all(
    mut query: sqlx::query::Query<'_, Postgres, PgArguments>,
    binds: Vec<Bind>,
) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    for bind in binds {
        query = match bind {
            Bind::Text(value) => query.bind(value),
            Bind::Int(value) => query.bind(value),
            Bind::Json(value) => query.bind(value),
        };
    }

    query
}

fn document(row: PgRow) -> Result<Value, anyhow::Error> {
    Ok(row.try_get::<Value, _>("data")?)
}

/// Stores every collection in one JSONB table; each update is a single
/// `UPDATE ... RETURNING` statement, so guards and changes are atomic.
#[derive(Clone)]
pub struct PgDocumentStore {
    conn: PgPool,
}

impl PgDocumentStore {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    pub async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data JSONB NOT NULL,
                seq BIGSERIAL,
                PRIMARY KEY (collection, id)
            )"#,
        )
        .execute(&self.conn)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS documents_data_idx ON documents USING GIN (data)")
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, anyhow::Error> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = $1 AND id = $2)",
        )
        .bind(collection)
        .bind(id)
        .fetch_one(&self.conn)
        .await?;

        Ok(exists)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, anyhow::Error> {
        let row = sqlx::query("SELECT data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.conn)
            .await?;

        row.map(document).transpose()
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO UPDATE SET data = EXCLUDED.data"#,
        )
        .bind(collection)
        .bind(id)
        .bind(data)
        .execute(&self.conn)
        .await?;

        Ok(())
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO NOTHING"#,
        )
        .bind(collection)
        .bind(id)
        .bind(data)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        update: Update,
    ) -> Result<Option<Value>, anyhow::Error> {
        let (sql, binds) = build_update(collection, id, &update);
        let row = bind_all(sqlx::query(&sql), binds)
            .fetch_optional(&self.conn)
            .await?;

        match row {
            Some(row) => Ok(Some(document(row)?)),
            None if self.exists(collection, id).await? => Ok(None),
            None => bail!("Document not found: {}/{}", collection, id),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.conn)
            .await?;

        Ok(())
    }

    async fn query(&self, collection: &str, query: Query) -> Result<Vec<Value>, anyhow::Error> {
        let (sql, binds) = build_query(collection, &query);
        let rows = bind_all(sqlx::query(&sql), binds)
            .fetch_all(&self.conn)
            .await?;

        rows.into_iter().map(document).collect()
    }
}
