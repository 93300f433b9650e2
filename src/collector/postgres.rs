//! PostgreSQL database-wide counters from `pg_stat_database`.
//!
//! Every value is a raw cumulative counter since server start or the last
//! statistics reset. The collector performs no differencing; all metrics are
//! flagged `diff` so the host reports per-interval deltas.

use crate::collector::Collector;
use crate::error::Error;
use crate::graph::{GraphDefinition, GraphRegistry, MetricDefinition};
use crate::metric::MetricSnapshot;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Row, TypeInfo};
use std::str::FromStr;
use tokio::runtime;

/// Counter columns, in the order the query selects them.
pub const COLUMNS: [&str; 9] = [
    "xact_commit",
    "xact_rollback",
    "blks_read",
    "blks_hit",
    "tup_returned",
    "tup_fetched",
    "tup_inserted",
    "tup_updated",
    "tup_deleted",
];

/// The statistics query. One row comes back per database.
pub const STAT_DATABASE_QUERY: &str = "select xact_commit, xact_rollback, blks_read, blks_hit, \
     tup_returned, tup_fetched, tup_inserted, tup_updated, tup_deleted \
     from pg_stat_database";

/// Graph metadata for `PostgresCollector`. Every metric is a counter.
pub fn graphs() -> GraphRegistry {
    GraphRegistry::new(vec![
        (
            "postgres.commits".to_string(),
            GraphDefinition::new(
                "PostgreSQL Commits",
                "integer",
                vec![
                    MetricDefinition::counter("xact_commit", "Xact Commit"),
                    MetricDefinition::counter("xact_rollback", "Xact Rollback"),
                ],
            ),
        ),
        (
            "postgres.blocks".to_string(),
            GraphDefinition::new(
                "PostgreSQL Blocks",
                "integer",
                vec![
                    MetricDefinition::counter("blks_read", "Blocks Read"),
                    MetricDefinition::counter("blks_hit", "Blocks Hit"),
                ],
            ),
        ),
        (
            "postgres.rows".to_string(),
            GraphDefinition::new(
                "PostgreSQL Rows",
                "integer",
                vec![
                    MetricDefinition::counter("tup_returned", "Returned Rows"),
                    MetricDefinition::counter("tup_fetched", "Fetched Rows"),
                    MetricDefinition::counter("tup_inserted", "Inserted Rows"),
                    MetricDefinition::counter("tup_updated", "Updated Rows"),
                    MetricDefinition::counter("tup_deleted", "Deleted Rows"),
                ],
            ),
        ),
    ])
}

/// A single result cell, as handed over by the database driver.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    /// Any integer column.
    Int(i64),
    /// Any floating point column.
    Float(f64),
    /// Textual column.
    Text(String),
    /// SQL NULL.
    Null,
}

/// One result row, columns in result order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatRow {
    cells: Vec<(String, Cell)>,
}

impl StatRow {
    /// Create an empty row.
    pub fn new() -> StatRow {
        StatRow::default()
    }

    /// Append a column, builder style.
    pub fn column<S>(mut self, name: S, cell: Cell) -> StatRow
    where
        S: Into<String>,
    {
        self.cells.push((name.into(), cell));
        self
    }

    /// Look a cell up by column name.
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.cells.iter().find(|&&(ref n, _)| n == name).map(|&(_, ref c)| c)
    }
}

/// Something able to run the statistics query.
pub trait StatisticsSource {
    /// Run `sql` and return every row.
    ///
    /// Execution failures are `Error::Query`; driver-level decoding
    /// failures are `Error::Decode`.
    fn query(&mut self, sql: &str) -> Result<Vec<StatRow>, Error>;
}

fn coerce(column: &str, cell: Option<&Cell>) -> Result<f64, Error> {
    match cell {
        Some(&Cell::Int(i)) => Ok(i as f64),
        Some(&Cell::Float(f)) => Ok(f),
        Some(&Cell::Text(ref s)) => Err(Error::Decode(format!(
            "column {} holds non-numeric value {:?}",
            column, s
        ))),
        Some(&Cell::Null) => Err(Error::Decode(format!("column {} is null", column))),
        None => Err(Error::Decode(format!("column {} missing from result", column))),
    }
}

/// Sum `rows` column-wise into a snapshot keyed by the fixed column names.
///
/// A single row maps 1:1. Several rows, one per database, yield the
/// server-wide totals. No rows at all is a decode error; counters are
/// never invented.
pub fn snapshot_from_rows(rows: &[StatRow]) -> Result<MetricSnapshot, Error> {
    if rows.is_empty() {
        return Err(Error::Decode("pg_stat_database returned no rows".to_string()));
    }
    let mut snapshot: MetricSnapshot = COLUMNS.iter().map(|c| (c.to_string(), 0.0)).collect();
    for row in rows {
        for column in &COLUMNS {
            let value = coerce(column, row.get(column))?;
            if let Some(total) = snapshot.get_mut(*column) {
                *total += value;
            }
        }
    }
    Ok(snapshot)
}

/// Collects `pg_stat_database` counters over a live connection.
pub struct PostgresCollector<S> {
    source: S,
}

impl<S> PostgresCollector<S>
where
    S: StatisticsSource,
{
    /// Create a new `PostgresCollector`.
    pub fn new(source: S) -> PostgresCollector<S> {
        PostgresCollector { source }
    }

    /// Give the statistics source back, e.g. to close its connection.
    pub fn into_inner(self) -> S {
        self.source
    }
}

impl<S> Collector for PostgresCollector<S>
where
    S: StatisticsSource,
{
    fn fetch_metrics(&mut self) -> Result<MetricSnapshot, Error> {
        let rows = self.source.query(STAT_DATABASE_QUERY)?;
        debug!("pg_stat_database returned {} rows", rows.len());
        snapshot_from_rows(&rows)
    }

    fn graphs(&self) -> GraphRegistry {
        graphs()
    }
}

/// Connection parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// Server host name.
    pub hostname: String,
    /// Server port.
    pub port: u16,
    /// Role to connect as.
    pub username: String,
    /// Password, if the server asks for one.
    pub password: Option<String>,
    /// Database to connect to.
    pub database: Option<String>,
    /// libpq-style sslmode, e.g. `disable` or `require`.
    pub sslmode: String,
}

impl Default for ConnectionConfig {
    fn default() -> ConnectionConfig {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: None,
            database: None,
            sslmode: "disable".to_string(),
        }
    }
}

/// `StatisticsSource` over a sqlx PostgreSQL connection, driven on a private
/// current-thread runtime.
pub struct SqlxStatistics {
    conn: PgConnection,
    runtime: runtime::Runtime,
}

fn query_error(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => Error::Decode(format!("{}", e)),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => Error::Transport(format!("{}", e)),
        _ => Error::Query(format!("{}", e)),
    }
}

fn to_stat_row(row: &PgRow) -> Result<StatRow, Error> {
    let mut stat = StatRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let cell = match column.type_info().name() {
            "INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Cell::Int)),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)
                .map(|v| v.map(|i| Cell::Int(i64::from(i)))),
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)
                .map(|v| v.map(|i| Cell::Int(i64::from(i)))),
            "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Cell::Float)),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)
                .map(|v| v.map(|f| Cell::Float(f64::from(f)))),
            "TEXT" | "VARCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map(Cell::Text)),
            other => {
                return Err(Error::Decode(format!(
                    "column {} has unsupported type {}",
                    column.name(),
                    other
                )))
            }
        }
        .map_err(query_error)?;
        stat = stat.column(column.name(), cell.unwrap_or(Cell::Null));
    }
    Ok(stat)
}

impl SqlxStatistics {
    /// Open a connection described by `config`.
    pub fn connect(config: &ConnectionConfig) -> Result<SqlxStatistics, Error> {
        let sslmode = PgSslMode::from_str(&config.sslmode)
            .map_err(|e| Error::Transport(format!("bad sslmode {:?}: {}", config.sslmode, e)))?;
        let mut options = PgConnectOptions::new()
            .host(&config.hostname)
            .port(config.port)
            .username(&config.username)
            .ssl_mode(sslmode);
        if let Some(ref password) = config.password {
            options = options.password(password);
        }
        if let Some(ref database) = config.database {
            options = options.database(database);
        }
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Transport(format!("could not start runtime: {}", e)))?;
        let conn = runtime
            .block_on(PgConnection::connect_with(&options))
            .map_err(|e| Error::Transport(format!("{}", e)))?;
        info!("connected to postgres at {}:{}", config.hostname, config.port);
        Ok(SqlxStatistics { conn, runtime })
    }

    /// Close the connection gracefully.
    pub fn close(self) -> Result<(), Error> {
        let SqlxStatistics { conn, runtime } = self;
        runtime
            .block_on(conn.close())
            .map_err(|e| Error::Transport(format!("{}", e)))
    }
}

impl StatisticsSource for SqlxStatistics {
    fn query(&mut self, sql: &str) -> Result<Vec<StatRow>, Error> {
        let conn = &mut self.conn;
        let rows = self
            .runtime
            .block_on(sqlx::query(sql).fetch_all(conn))
            .map_err(query_error)?;
        rows.iter().map(to_stat_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{QuickCheck, TestResult};

    /// Hands out canned results and records the SQL it was given.
    struct Stub {
        result: Option<Result<Vec<StatRow>, Error>>,
        sql: Vec<String>,
    }

    impl StatisticsSource for Stub {
        fn query(&mut self, sql: &str) -> Result<Vec<StatRow>, Error> {
            self.sql.push(sql.to_string());
            self.result.take().expect("queried twice")
        }
    }

    fn stub(result: Result<Vec<StatRow>, Error>) -> Stub {
        Stub {
            result: Some(result),
            sql: Vec::new(),
        }
    }

    fn row(values: [i64; 9]) -> StatRow {
        COLUMNS
            .iter()
            .zip(values.iter())
            .fold(StatRow::new(), |r, (c, v)| r.column(*c, Cell::Int(*v)))
    }

    #[test]
    fn rows_are_summed() {
        let rows = vec![
            row([1, 2, 3, 4, 5, 6, 7, 8, 9]),
            row([10, 20, 30, 40, 50, 60, 70, 80, 90]),
        ];
        let mut c = PostgresCollector::new(stub(Ok(rows)));
        let stat = c.fetch_metrics().unwrap();

        assert_eq!(11.0, stat["xact_commit"]);
        assert_eq!(44.0, stat["blks_hit"]);
        assert_eq!(55.0, stat["tup_returned"]);
        assert_eq!(99.0, stat["tup_deleted"]);
        assert_eq!(vec![STAT_DATABASE_QUERY.to_string()], c.into_inner().sql);
    }

    #[test]
    fn keys_are_the_nine_columns() {
        let mut c = PostgresCollector::new(stub(Ok(vec![row([0; 9])])));
        let stat = c.fetch_metrics().unwrap();
        let mut keys: Vec<&str> = stat.keys().map(|k| k.as_str()).collect();
        keys.sort();
        let mut expected = COLUMNS.to_vec();
        expected.sort();
        assert_eq!(expected, keys);
        assert!(c.graphs().orphans(&stat).is_empty());
        for col in &COLUMNS {
            assert!(c.graphs().is_diff(col));
        }
    }

    #[test]
    fn single_row_maps_exactly() {
        fn inner(vals: Vec<u32>, big: u32) -> TestResult {
            if vals.len() < 9 {
                return TestResult::discard();
            }
            let mut values = [0i64; 9];
            for (slot, v) in values.iter_mut().zip(vals.iter()) {
                *slot = i64::from(*v);
            }
            // exercise values past 32 bits
            values[3] = i64::from(big) << 20;
            let stat = snapshot_from_rows(&[row(values)]).unwrap();
            for (col, v) in COLUMNS.iter().zip(values.iter()) {
                assert_eq!(*v as f64, stat[*col]);
            }
            TestResult::passed()
        }
        QuickCheck::new()
            .tests(500)
            .quickcheck(inner as fn(Vec<u32>, u32) -> TestResult);
    }

    #[test]
    fn float_cells_are_accepted() {
        let r = COLUMNS
            .iter()
            .fold(StatRow::new(), |r, c| r.column(*c, Cell::Float(2.5)));
        let stat = snapshot_from_rows(&[r]).unwrap();
        assert_eq!(2.5, stat["blks_read"]);
    }

    #[test]
    fn query_error_propagates() {
        let mut c = PostgresCollector::new(stub(Err(Error::Query(
            "relation \"pg_stat_database\" does not exist".to_string(),
        ))));
        match c.fetch_metrics() {
            Err(Error::Query(_)) => {}
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[test]
    fn null_cell_is_decode_error() {
        let mut r = row([1; 9]);
        r.cells[4].1 = Cell::Null;
        let mut c = PostgresCollector::new(stub(Ok(vec![row([1; 9]), r])));
        match c.fetch_metrics() {
            Err(Error::Decode(msg)) => assert!(msg.contains("tup_returned")),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn text_and_missing_cells_are_decode_errors() {
        let mut r = row([1; 9]);
        r.cells[0].1 = Cell::Text("lots".to_string());
        assert!(match snapshot_from_rows(&[r]) {
            Err(Error::Decode(_)) => true,
            _ => false,
        });

        let short = StatRow::new().column("xact_commit", Cell::Int(1));
        assert!(match snapshot_from_rows(&[short]) {
            Err(Error::Decode(_)) => true,
            _ => false,
        });
    }

    #[test]
    fn empty_result_is_decode_error() {
        let mut c = PostgresCollector::new(stub(Ok(Vec::new())));
        match c.fetch_metrics() {
            Err(Error::Decode(msg)) => assert!(msg.contains("no rows")),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    /// Answers every query with the same rows.
    struct Steady(Vec<StatRow>);

    impl StatisticsSource for Steady {
        fn query(&mut self, _sql: &str) -> Result<Vec<StatRow>, Error> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn repeated_collection_is_stable() {
        let rows = vec![row([3, 1, 4, 1, 5, 9, 2, 6, 5]), row([2, 7, 1, 8, 2, 8, 1, 8, 2])];
        let mut c = PostgresCollector::new(Steady(rows));
        let first = c.fetch_metrics().unwrap();
        let second = c.fetch_metrics().unwrap();
        assert_eq!(first, second);
        assert_eq!(5.0, first["xact_commit"]);
    }

    #[test]
    fn sqlx_errors_are_classified() {
        match query_error(sqlx::Error::ColumnNotFound("blks_hit".to_string())) {
            Error::Decode(_) => {}
            other => panic!("expected decode error, got {:?}", other),
        }
        match query_error(sqlx::Error::RowNotFound) {
            Error::Query(_) => {}
            other => panic!("expected query error, got {:?}", other),
        }
    }
}
