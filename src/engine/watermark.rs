// ABOUTME: WatermarkTracker - per table/direction boundary of already-synced rows
// ABOUTME: Reads MAX(updated_at) on the receiving side, floors to the epoch on failure

use chrono::{NaiveDate, NaiveDateTime};

use super::context::Direction;
use super::schema::UPDATED_AT;
use crate::store::{SqlValue, SyncStore};

/// Watermark used when the receiving side has nothing to compare against.
pub const EPOCH_FLOOR: &str = "1970-01-01 00:00:00";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Fixed microsecond precision, so a text comparison in SQLite never ranks a
/// stored value above an equal watermark just because it carries more digits.
const PARAM_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Rows with `updated_at` strictly above `value` still need to flow in `direction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub table: String,
    pub direction: Direction,
    pub value: NaiveDateTime,
}

impl Watermark {
    /// Watermark that selects every row.
    pub fn floor(table: &str, direction: Direction) -> Self {
        Self {
            table: table.to_string(),
            direction,
            value: epoch_floor(),
        }
    }

    pub fn is_floor(&self) -> bool {
        self.value == epoch_floor()
    }

    /// The watermark as a bound parameter, in the format both backends compare correctly.
    pub fn as_param(&self) -> SqlValue {
        SqlValue::Text(self.value.format(PARAM_FORMAT).to_string())
    }
}

pub fn epoch_floor() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// `YYYY-MM-DD HH:MM:SS`, with a fractional part only when one is present.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored `updated_at` value. Accepts `YYYY-MM-DD HH:MM:SS[.f]`, the
/// ISO `T` separator, and bare dates.
pub fn parse_timestamp(value: &SqlValue) -> Option<NaiveDateTime> {
    let text = value.to_text()?;
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Computes watermarks from the receiving side of each direction.
pub struct WatermarkTracker;

impl WatermarkTracker {
    /// Highest `updated_at` in `store`'s copy of `table`.
    ///
    /// Returns the epoch floor when the table is empty, the value cannot be
    /// parsed, or the query fails, so the worst case is a full resync rather
    /// than silently skipped rows.
    pub async fn last_synced<S: SyncStore>(store: &mut S, table: &str) -> NaiveDateTime {
        let dialect = store.dialect();
        let sql = format!(
            "SELECT MAX({}) AS watermark FROM {}",
            dialect.quote(UPDATED_AT),
            dialect.quote(table)
        );

        let rows = match store.query(&sql, &[]).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    "Could not read watermark for {} on {}: {:#}. Falling back to {}",
                    table,
                    store.describe(),
                    e,
                    EPOCH_FLOOR
                );
                return epoch_floor();
            }
        };

        let Some(raw) = rows.first().and_then(|row| row.at(0)) else {
            return epoch_floor();
        };
        if raw.is_null() {
            return epoch_floor();
        }

        parse_timestamp(raw).unwrap_or_else(|| {
            tracing::warn!(
                "Unrecognised {} value {:?} in {}; falling back to {}",
                UPDATED_AT,
                raw,
                table,
                EPOCH_FLOOR
            );
            epoch_floor()
        })
    }

    /// Watermark for `direction`, read from the side that receives the rows.
    pub async fn compute<S: SyncStore>(
        receiver: &mut S,
        table: &str,
        direction: Direction,
    ) -> Watermark {
        let value = Self::last_synced(receiver, table).await;
        tracing::debug!(
            "Watermark for {} ({}): {}",
            table,
            direction,
            format_timestamp(&value)
        );
        Watermark {
            table: table.to_string(),
            direction,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(
            parse_timestamp(&"2024-05-01 09:30:00".into()),
            Some(expected)
        );
        assert_eq!(
            parse_timestamp(&"2024-05-01T09:30:00".into()),
            Some(expected)
        );
        assert!(parse_timestamp(&"2024-05-01 09:30:00.250".into()).unwrap() > expected);
        assert_eq!(
            parse_timestamp(&"2024-05-01".into()),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp(&"yesterday".into()), None);
        assert_eq!(parse_timestamp(&SqlValue::Null), None);
    }

    #[test]
    fn test_format_timestamp_omits_zero_fraction() {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01 09:30:00");
        assert_eq!(format_timestamp(&epoch_floor()), EPOCH_FLOOR);
    }

    #[tokio::test]
    async fn test_last_synced_reads_max_updated_at() {
        let mut store = SqliteStore::open("sqlite::memory:").unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TABLE sales (id INTEGER PRIMARY KEY, updated_at TEXT);
                 INSERT INTO sales VALUES (1, '2024-01-01 10:00:00'),
                                          (2, '2024-03-01 08:15:00'),
                                          (3, '2024-02-01 23:59:59');",
            )
            .unwrap();

        let value = WatermarkTracker::last_synced(&mut store, "sales").await;
        assert_eq!(format_timestamp(&value), "2024-03-01 08:15:00");
    }

    #[tokio::test]
    async fn test_last_synced_floors_empty_and_missing_tables() {
        let mut store = SqliteStore::open("sqlite::memory:").unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE empty_t (id INTEGER PRIMARY KEY, updated_at TEXT);")
            .unwrap();

        assert_eq!(
            WatermarkTracker::last_synced(&mut store, "empty_t").await,
            epoch_floor()
        );
        assert_eq!(
            WatermarkTracker::last_synced(&mut store, "no_such_table").await,
            epoch_floor()
        );

        let wm = WatermarkTracker::compute(&mut store, "empty_t", Direction::EdgeToCloud).await;
        assert!(wm.is_floor());
        assert_eq!(
            wm.as_param(),
            SqlValue::Text("1970-01-01 00:00:00.000000".to_string())
        );
    }
}
