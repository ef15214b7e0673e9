// ABOUTME: RowBatchUpserter - moves changed rows from one store to the other
// ABOUTME: Keyset-paged reads and multi-row upserts with bound parameters only

use anyhow::{bail, Context, Result};

use super::context::{Direction, RunContext};
use super::schema::{TableDescriptor, UPDATED_AT};
use super::watermark::Watermark;
use crate::config::ConflictPolicy;
use crate::error::{one_line, SyncError};
use crate::store::{Dialect, RowRecord, SqlValue, SyncStore, UpsertSyntax};
use crate::utils::validate_identifier;

/// Pages through a table in a stable order, remembering where the last page ended.
///
/// Ordered by `(updated_at, key...)` for incremental reads, by the key alone
/// for full copies, and by OFFSET when the table has no key at all.
#[derive(Debug, Clone)]
pub struct ChangeCursor {
    pub table: String,
    pub columns: Vec<String>,
    pub order_columns: Vec<String>,
    pub since: Option<SqlValue>,
    pub page_size: usize,
    last: Option<Vec<SqlValue>>,
    offset: usize,
    exhausted: bool,
}

impl ChangeCursor {
    /// Rows of `table` whose `updated_at` is strictly above `since`.
    pub fn changed_since(
        table: &str,
        columns: &[String],
        key_columns: &[String],
        since: SqlValue,
        page_size: usize,
    ) -> Self {
        let mut order_columns = vec![UPDATED_AT.to_string()];
        order_columns.extend(key_columns.iter().cloned());
        Self::new(table, columns, order_columns, Some(since), page_size)
    }

    /// Every row of `table`.
    pub fn full_table(
        table: &str,
        columns: &[String],
        key_columns: &[String],
        page_size: usize,
    ) -> Self {
        Self::new(table, columns, key_columns.to_vec(), None, page_size)
    }

    fn new(
        table: &str,
        columns: &[String],
        order_columns: Vec<String>,
        since: Option<SqlValue>,
        page_size: usize,
    ) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.to_vec(),
            order_columns,
            since,
            page_size: page_size.max(1),
            last: None,
            offset: 0,
            exhausted: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page, or `None` once the table is drained.
    pub async fn next_page<S: SyncStore>(&mut self, store: &mut S) -> Result<Option<Vec<RowRecord>>> {
        if self.exhausted {
            return Ok(None);
        }

        let query = build_select_page_query(
            store.dialect(),
            &self.table,
            &self.columns,
            &self.order_columns,
            self.since.is_some(),
            self.last.is_some(),
            self.page_size,
            self.offset,
        );

        let mut params = Vec::with_capacity(1 + self.order_columns.len());
        if let Some(since) = &self.since {
            params.push(since.clone());
        }
        if let Some(last) = &self.last {
            params.extend(last.iter().cloned());
        }

        let rows = store
            .query(&query, &params)
            .await
            .with_context(|| format!("Failed to read page from {}", self.table))?;

        if rows.len() < self.page_size {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        if self.order_columns.is_empty() {
            self.offset += rows.len();
        } else if let Some(last_row) = rows.last() {
            let mut last = Vec::with_capacity(self.order_columns.len());
            for column in &self.order_columns {
                let value = last_row
                    .get(column)
                    .cloned()
                    .with_context(|| format!("Page from {} is missing column {}", self.table, column))?;
                last.push(value);
            }
            self.last = Some(last);
        }

        Ok(Some(rows))
    }
}

/// Applies pages of source rows to a target store.
#[derive(Debug, Clone, Copy)]
pub struct RowBatchUpserter {
    batch_size: usize,
    policy: ConflictPolicy,
}

impl RowBatchUpserter {
    pub fn new(batch_size: usize, policy: ConflictPolicy) -> Self {
        Self {
            batch_size: batch_size.max(1),
            policy,
        }
    }

    /// Copy rows changed since `since` from `source` to `target`.
    ///
    /// Fetch and write failures are recorded in `ctx`: a failed page write is
    /// skipped and the next page is still applied, a failed fetch ends this
    /// direction for this table. Returns the number of rows sent.
    pub async fn sync<S: SyncStore, T: SyncStore>(
        &self,
        table: &str,
        source: &mut S,
        target: &mut T,
        since: &Watermark,
        ctx: &mut RunContext,
    ) -> u64 {
        let direction = since.direction;
        let plan = match plan_transfer(table, source, target).await {
            Ok(plan) => plan,
            Err(e) => {
                ctx.record(SyncError::Fetch {
                    table: table.to_string(),
                    direction,
                    message: one_line(&e),
                });
                return 0;
            }
        };

        if plan.key_columns.is_empty() {
            ctx.record(SyncError::Write {
                table: table.to_string(),
                direction,
                message: "no primary or unique key on target; table skipped".to_string(),
            });
            return 0;
        }
        if !contains(&plan.columns, UPDATED_AT) {
            ctx.record(SyncError::Fetch {
                table: table.to_string(),
                direction,
                message: format!("{} missing on one side; table skipped", UPDATED_AT),
            });
            return 0;
        }

        let page_size = effective_batch_size(self.batch_size, target.dialect(), plan.columns.len());
        let mut cursor = ChangeCursor::changed_since(
            table,
            &plan.columns,
            &plan.key_columns,
            since.as_param(),
            page_size,
        );

        let sent = self
            .drain(&mut cursor, &plan, source, target, direction, ctx)
            .await;
        if sent > 0 {
            tracing::info!("{} ({}): {} row(s) synced", table, direction, sent);
        }
        sent
    }

    /// Copy every row of `table` into a freshly recreated target table.
    pub async fn copy_all<S: SyncStore, T: SyncStore>(
        &self,
        table: &str,
        source: &mut S,
        target: &mut T,
        ctx: &mut RunContext,
    ) -> u64 {
        let direction = Direction::EdgeToCloud;
        let plan = match plan_transfer(table, source, target).await {
            Ok(plan) => plan,
            Err(e) => {
                ctx.record(SyncError::Fetch {
                    table: table.to_string(),
                    direction,
                    message: one_line(&e),
                });
                return 0;
            }
        };

        let page_size = effective_batch_size(self.batch_size, target.dialect(), plan.columns.len());
        let mut cursor = ChangeCursor::full_table(table, &plan.columns, &plan.key_columns, page_size);

        let sent = self
            .drain(&mut cursor, &plan, source, target, direction, ctx)
            .await;
        tracing::info!("{} ({}): {} row(s) copied", table, direction, sent);
        sent
    }

    async fn drain<S: SyncStore, T: SyncStore>(
        &self,
        cursor: &mut ChangeCursor,
        plan: &TransferPlan,
        source: &mut S,
        target: &mut T,
        direction: Direction,
        ctx: &mut RunContext,
    ) -> u64 {
        let mut sent = 0u64;
        let mut batch = 0usize;

        loop {
            let rows = match cursor.next_page(source).await {
                Ok(Some(rows)) => rows,
                Ok(None) => break,
                Err(e) => {
                    ctx.record(SyncError::Fetch {
                        table: plan.table.clone(),
                        direction,
                        message: one_line(&e),
                    });
                    break;
                }
            };
            batch += 1;

            match apply_batch(target, plan, &rows, self.policy).await {
                Ok(_) => {
                    sent += rows.len() as u64;
                    tracing::debug!(
                        "{} ({}): batch {} applied ({} rows)",
                        plan.table,
                        direction,
                        batch,
                        rows.len()
                    );
                }
                Err(e) => ctx.record(SyncError::Write {
                    table: plan.table.clone(),
                    direction,
                    message: format!("batch {}: {}", batch, one_line(&e)),
                }),
            }
        }

        ctx.rows_synced += sent;
        sent
    }
}

/// Columns and key shared by both sides of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub table: String,
    pub columns: Vec<String>,
    pub key_columns: Vec<String>,
}

/// Work out which columns can be copied and which key the target upserts on.
///
/// Columns are the source's, in source order, restricted to those the target
/// also has. The key is the target's and must be fully covered by the columns.
pub async fn plan_transfer<S: SyncStore, T: SyncStore>(
    table: &str,
    source: &mut S,
    target: &mut T,
) -> Result<TransferPlan> {
    validate_identifier(table)?;

    let source_desc = TableDescriptor::introspect(source, table)
        .await
        .with_context(|| format!("Failed to describe {} on {}", table, source.describe()))?;
    let target_desc = TableDescriptor::introspect(target, table)
        .await
        .with_context(|| format!("Failed to describe {} on {}", table, target.describe()))?;

    let columns: Vec<String> = source_desc
        .columns
        .into_iter()
        .filter(|c| target_desc.has_column(c))
        .collect();
    if columns.is_empty() {
        bail!("No columns in common");
    }
    for column in &columns {
        validate_identifier(column)
            .with_context(|| format!("Unsupported column name in {}", table))?;
    }

    let key_columns = target_desc.key_columns;
    if let Some(missing) = key_columns.iter().find(|k| !contains(&columns, k)) {
        bail!("Key column {} is not present on both sides", missing);
    }

    Ok(TransferPlan {
        table: table.to_string(),
        columns,
        key_columns,
    })
}

async fn apply_batch<T: SyncStore>(
    target: &mut T,
    plan: &TransferPlan,
    rows: &[RowRecord],
    policy: ConflictPolicy,
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let query = build_upsert_query(
        target.upsert_syntax(),
        &plan.table,
        &plan.key_columns,
        &plan.columns,
        rows.len(),
        policy,
    );

    // The page was selected with exactly `plan.columns`, in order
    let params: Vec<SqlValue> = rows
        .iter()
        .flat_map(|row| (0..plan.columns.len()).map(move |i| row.at(i).cloned().unwrap_or(SqlValue::Null)))
        .collect();

    target
        .execute(&query, &params)
        .await
        .with_context(|| format!("Failed to upsert batch into {}", plan.table))
}

fn contains(columns: &[String], column: &str) -> bool {
    columns.iter().any(|c| c.eq_ignore_ascii_case(column))
}

/// Rows per statement: the configured batch size, reduced so that
/// `rows × columns` bound parameters fit the target dialect.
pub fn effective_batch_size(batch_size: usize, dialect: Dialect, num_columns: usize) -> usize {
    let by_params = dialect.max_bind_params() / num_columns.max(1);
    batch_size.min(by_params).max(1)
}

/// Build the page query of a [`ChangeCursor`].
///
/// ```sql
/// SELECT "id", "name", "updated_at" FROM "t"
/// WHERE "updated_at" > ? AND ("updated_at", "id") > (?, ?)
/// ORDER BY "updated_at", "id" LIMIT 500
/// ```
#[allow(clippy::too_many_arguments)]
pub fn build_select_page_query(
    dialect: Dialect,
    table: &str,
    columns: &[String],
    order_columns: &[String],
    has_since: bool,
    has_cursor: bool,
    limit: usize,
    offset: usize,
) -> String {
    let q = |c: &str| dialect.quote(c);
    let column_list = columns.iter().map(|c| q(c)).collect::<Vec<_>>().join(", ");

    let mut conditions = Vec::new();
    if has_since {
        conditions.push(format!("{} > ?", q(UPDATED_AT)));
    }
    if has_cursor && !order_columns.is_empty() {
        let order_list = order_columns.iter().map(|c| q(c)).collect::<Vec<_>>();
        let placeholders = vec!["?"; order_columns.len()];
        conditions.push(format!("({}) > ({})", order_list.join(", "), placeholders.join(", ")));
    }

    let mut query = format!("SELECT {} FROM {}", column_list, q(table));
    if !conditions.is_empty() {
        query.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
    }
    if order_columns.is_empty() {
        query.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    } else {
        let order_list = order_columns.iter().map(|c| q(c)).collect::<Vec<_>>();
        query.push_str(&format!(" ORDER BY {} LIMIT {}", order_list.join(", "), limit));
    }
    query
}

/// Build a multi-row upsert for `num_rows` rows of `columns`.
///
/// SQLite:
/// ```sql
/// INSERT INTO "t" ("id", "name", "updated_at") VALUES (?, ?, ?), (?, ?, ?)
/// ON CONFLICT ("id") DO UPDATE SET "name" = excluded."name", "updated_at" = excluded."updated_at"
/// WHERE excluded."updated_at" >= "t"."updated_at" OR "t"."updated_at" IS NULL
/// ```
///
/// MySQL uses `ON DUPLICATE KEY UPDATE`, reading the incoming row through the
/// `incoming` row alias or, on older servers and MariaDB, `VALUES()`. Under
/// [`ConflictPolicy::NewestWins`] each assignment is wrapped in `IF(...)` with
/// `updated_at` assigned last, as later assignments see the already-updated
/// row. With no key columns this is a plain `INSERT`.
pub fn build_upsert_query(
    syntax: UpsertSyntax,
    table: &str,
    key_columns: &[String],
    columns: &[String],
    num_rows: usize,
    policy: ConflictPolicy,
) -> String {
    let dialect = syntax.dialect();
    let q = |c: &str| dialect.quote(c);
    let quoted_columns: Vec<String> = columns.iter().map(|c| q(c)).collect();

    let row_placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let value_rows = vec![row_placeholders; num_rows].join(", ");

    let insert = format!(
        "INSERT INTO {} ({}) VALUES {}",
        q(table),
        quoted_columns.join(", "),
        value_rows
    );
    if key_columns.is_empty() {
        return insert;
    }

    // Non-key columns, with updated_at moved to the end
    let mut update_columns: Vec<&String> = columns
        .iter()
        .filter(|c| !contains(key_columns, c) && !c.eq_ignore_ascii_case(UPDATED_AT))
        .collect();
    let has_updated_at = columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case(UPDATED_AT) && !contains(key_columns, c));
    if let Some(updated_at) = has_updated_at {
        update_columns.push(updated_at);
    }
    let conditional = policy == ConflictPolicy::NewestWins && has_updated_at.is_some();

    match syntax {
        UpsertSyntax::OnConflict => {
            let conflict_target = key_columns.iter().map(|c| q(c)).collect::<Vec<_>>().join(", ");
            if update_columns.is_empty() {
                return format!("{} ON CONFLICT ({}) DO NOTHING", insert, conflict_target);
            }
            let assignments = update_columns
                .iter()
                .map(|c| format!("{} = excluded.{}", q(c), q(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let mut query = format!(
                "{} ON CONFLICT ({}) DO UPDATE SET {}",
                insert, conflict_target, assignments
            );
            if conditional {
                query.push_str(&format!(
                    " WHERE excluded.{u} >= {t}.{u} OR {t}.{u} IS NULL",
                    u = q(UPDATED_AT),
                    t = q(table)
                ));
            }
            query
        }
        UpsertSyntax::DuplicateKeyValues | UpsertSyntax::DuplicateKeyRowAlias => {
            let (insert, incoming): (String, fn(&str) -> String) =
                if syntax == UpsertSyntax::DuplicateKeyRowAlias {
                    (format!("{} AS incoming", insert), |c: &str| format!("incoming.{}", c))
                } else {
                    (insert, |c: &str| format!("VALUES({})", c))
                };
            if update_columns.is_empty() {
                let first_key = q(&key_columns[0]);
                return format!("{} ON DUPLICATE KEY UPDATE {} = {}", insert, first_key, first_key);
            }
            let newer = format!(
                "{} >= {u} OR {u} IS NULL",
                incoming(&q(UPDATED_AT)),
                u = q(UPDATED_AT)
            );
            let assignments = update_columns
                .iter()
                .map(|c| {
                    let c = q(c);
                    if conditional {
                        format!("{c} = IF({newer}, {new}, {c})", new = incoming(&c))
                    } else {
                        format!("{c} = {new}", new = incoming(&c))
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} ON DUPLICATE KEY UPDATE {}", insert, assignments)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_upsert_query_sqlite_newest_wins() {
        let query = build_upsert_query(
            UpsertSyntax::OnConflict,
            "users",
            &cols(&["id"]),
            &cols(&["id", "updated_at", "name"]),
            1,
            ConflictPolicy::NewestWins,
        );

        assert!(query.starts_with("INSERT INTO \"users\" (\"id\", \"updated_at\", \"name\")"));
        assert!(query.contains("VALUES (?, ?, ?)"));
        assert!(query.contains("ON CONFLICT (\"id\") DO UPDATE SET"));
        assert!(query.contains("\"name\" = excluded.\"name\", \"updated_at\" = excluded.\"updated_at\""));
        assert!(query.ends_with(
            "WHERE excluded.\"updated_at\" >= \"users\".\"updated_at\" OR \"users\".\"updated_at\" IS NULL"
        ));
    }

    #[test]
    fn test_build_upsert_query_multiple_rows() {
        let query = build_upsert_query(
            UpsertSyntax::OnConflict,
            "users",
            &cols(&["id"]),
            &cols(&["id", "name"]),
            3,
            ConflictPolicy::LastDirectionWins,
        );

        assert!(query.contains("VALUES (?, ?), (?, ?), (?, ?) ON CONFLICT"));
        assert!(!query.contains("WHERE"));
    }

    #[test]
    fn test_build_upsert_query_mysql_conditional_assigns_updated_at_last() {
        let query = build_upsert_query(
            UpsertSyntax::DuplicateKeyValues,
            "order_items",
            &cols(&["order_id", "item_id"]),
            &cols(&["order_id", "item_id", "updated_at", "quantity"]),
            1,
            ConflictPolicy::NewestWins,
        );

        assert!(query.contains("ON DUPLICATE KEY UPDATE `quantity` = IF("));
        assert!(query.ends_with(
            "`updated_at` = IF(VALUES(`updated_at`) >= `updated_at` OR `updated_at` IS NULL, \
             VALUES(`updated_at`), `updated_at`)"
        ));
        assert!(!query.contains("`order_id` = IF"));
    }

    #[test]
    fn test_build_upsert_query_mysql_unconditional() {
        let query = build_upsert_query(
            UpsertSyntax::DuplicateKeyValues,
            "users",
            &cols(&["id"]),
            &cols(&["id", "name", "updated_at"]),
            2,
            ConflictPolicy::LastDirectionWins,
        );

        assert!(query.contains("VALUES (?, ?, ?), (?, ?, ?)"));
        assert!(query.ends_with(
            "ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `updated_at` = VALUES(`updated_at`)"
        ));
    }

    #[test]
    fn test_build_upsert_query_mysql_row_alias() {
        let query = build_upsert_query(
            UpsertSyntax::DuplicateKeyRowAlias,
            "users",
            &cols(&["id"]),
            &cols(&["id", "name", "updated_at"]),
            2,
            ConflictPolicy::NewestWins,
        );

        assert!(query.contains("VALUES (?, ?, ?), (?, ?, ?) AS incoming ON DUPLICATE KEY UPDATE"));
        assert!(query.contains(
            "`name` = IF(incoming.`updated_at` >= `updated_at` OR `updated_at` IS NULL, \
             incoming.`name`, `name`)"
        ));
        assert!(!query.contains("VALUES(`"));

        let plain = build_upsert_query(
            UpsertSyntax::DuplicateKeyRowAlias,
            "users",
            &cols(&["id"]),
            &cols(&["id", "name"]),
            1,
            ConflictPolicy::LastDirectionWins,
        );
        assert!(plain.ends_with("AS incoming ON DUPLICATE KEY UPDATE `name` = incoming.`name`"));
    }

    #[test]
    fn test_build_upsert_query_all_key_columns() {
        let sqlite = build_upsert_query(
            UpsertSyntax::OnConflict,
            "tags",
            &cols(&["id"]),
            &cols(&["id"]),
            1,
            ConflictPolicy::NewestWins,
        );
        assert!(sqlite.ends_with("DO NOTHING"));

        let mysql = build_upsert_query(
            UpsertSyntax::DuplicateKeyValues,
            "tags",
            &cols(&["id"]),
            &cols(&["id"]),
            1,
            ConflictPolicy::NewestWins,
        );
        assert!(mysql.ends_with("ON DUPLICATE KEY UPDATE `id` = `id`"));
    }

    #[test]
    fn test_build_upsert_query_without_key_is_plain_insert() {
        let query = build_upsert_query(
            UpsertSyntax::OnConflict,
            "notes",
            &[],
            &cols(&["body"]),
            2,
            ConflictPolicy::NewestWins,
        );
        assert_eq!(query, "INSERT INTO \"notes\" (\"body\") VALUES (?), (?)");
    }

    #[test]
    fn test_build_select_page_query_keyset() {
        let first = build_select_page_query(
            Dialect::Sqlite,
            "sales",
            &cols(&["id", "updated_at"]),
            &cols(&["updated_at", "id"]),
            true,
            false,
            500,
            0,
        );
        assert_eq!(
            first,
            "SELECT \"id\", \"updated_at\" FROM \"sales\" WHERE \"updated_at\" > ? \
             ORDER BY \"updated_at\", \"id\" LIMIT 500"
        );

        let next = build_select_page_query(
            Dialect::MySql,
            "sales",
            &cols(&["id", "updated_at"]),
            &cols(&["updated_at", "id"]),
            true,
            true,
            500,
            0,
        );
        assert!(next.contains("WHERE `updated_at` > ? AND (`updated_at`, `id`) > (?, ?)"));
    }

    #[test]
    fn test_build_select_page_query_offset_without_key() {
        let query = build_select_page_query(
            Dialect::Sqlite,
            "notes",
            &cols(&["body"]),
            &[],
            false,
            false,
            100,
            200,
        );
        assert_eq!(query, "SELECT \"body\" FROM \"notes\" LIMIT 100 OFFSET 200");
    }

    #[test]
    fn test_effective_batch_size_respects_parameter_limit() {
        assert_eq!(effective_batch_size(500, Dialect::Sqlite, 10), 500);
        assert_eq!(effective_batch_size(500, Dialect::Sqlite, 100), 327);
        assert_eq!(effective_batch_size(0, Dialect::MySql, 3), 1);
        assert_eq!(effective_batch_size(500, Dialect::MySql, 0), 500);
    }

    #[tokio::test]
    async fn test_cursor_pages_through_equal_timestamps() {
        let mut store = SqliteStore::open("sqlite::memory:").unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, updated_at TEXT);
                 INSERT INTO t VALUES (1, '2024-01-01 00:00:00'), (2, '2024-01-01 00:00:00'),
                                      (3, '2024-01-01 00:00:00'), (4, '2024-01-02 00:00:00'),
                                      (5, '2023-12-31 00:00:00');",
            )
            .unwrap();

        let mut cursor = ChangeCursor::changed_since(
            "t",
            &cols(&["id", "updated_at"]),
            &cols(&["id"]),
            SqlValue::Text("2024-01-01 00:00:00.000000".to_string()),
            2,
        );
        // Watermark sits exactly on rows 1..3, so only row 4 is newer
        let page = cursor.next_page(&mut store).await.unwrap().unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].get("id"), Some(&SqlValue::Int(4)));
        assert!(cursor.is_exhausted());

        let mut cursor = ChangeCursor::changed_since(
            "t",
            &cols(&["id", "updated_at"]),
            &cols(&["id"]),
            SqlValue::Text("2023-12-31 00:00:00.000000".to_string()),
            2,
        );
        let mut seen = Vec::new();
        while let Some(page) = cursor.next_page(&mut store).await.unwrap() {
            seen.extend(page.iter().filter_map(|r| r.get("id").and_then(SqlValue::to_i64)));
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_full_table_cursor_without_key_uses_offset() {
        let mut store = SqliteStore::open("sqlite::memory:").unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('a'), ('b'), ('c');")
            .unwrap();

        let mut cursor = ChangeCursor::full_table("notes", &cols(&["body"]), &[], 2);
        let mut total = 0;
        while let Some(page) = cursor.next_page(&mut store).await.unwrap() {
            total += page.len();
        }
        assert_eq!(total, 3);
    }
}
