use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};

use crate::config::Config;
use crate::error::{EtlError, Result};
use crate::models::NormalizedRow;

#[derive(Debug, Clone)]
pub struct AttemptStore {
    pool: PgPool,
}

impl AttemptStore {
    pub async fn connect(config: &Config) -> Result<Self> {
        let options: PgConnectOptions = config
            .database_url()?
            .parse()
            .map_err(|e| EtlError::Config(format!("invalid DATABASE_URL: {e}")))?;
        let options = options.options([(
            "statement_timeout",
            config.database_statement_timeout.as_millis().to_string(),
        )]);

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.database_connect_timeout)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Creates `Users` when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts every row in one transaction. Either all rows are committed or
    /// none are.
    pub async fn append(&self, rows: &[NormalizedRow]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO Users
                (user_id, oauth_consumer_key, lis_result_sourcedid, lis_outcome_service_url,
                 is_correct, attempt_type, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&row.user_id)
            .bind(&row.oauth_consumer_key)
            .bind(&row.lis_result_sourcedid)
            .bind(&row.lis_outcome_service_url)
            .bind(row.is_correct.map(correctness_text))
            .bind(&row.attempt_type)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    pub async fn fetch_all(&self) -> Result<Vec<NormalizedRow>> {
        let records = sqlx::query(
            "SELECT user_id, oauth_consumer_key, lis_result_sourcedid, lis_outcome_service_url, \
             is_correct, attempt_type, created_at \
             FROM Users ORDER BY created_at, user_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let is_correct: Option<String> = record.try_get("is_correct")?;
            rows.push(NormalizedRow {
                user_id: text_column(&record, "user_id")?,
                oauth_consumer_key: text_column(&record, "oauth_consumer_key")?,
                lis_result_sourcedid: text_column(&record, "lis_result_sourcedid")?,
                lis_outcome_service_url: text_column(&record, "lis_outcome_service_url")?,
                is_correct: is_correct.as_deref().map(parse_correctness_text).transpose()?,
                attempt_type: text_column(&record, "attempt_type")?,
                created_at: record.try_get("created_at")?,
            });
        }

        Ok(rows)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn text_column(record: &sqlx::postgres::PgRow, column: &str) -> Result<String> {
    let value: Option<String> = record.try_get(column)?;
    Ok(value.unwrap_or_default())
}

fn correctness_text(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

fn parse_correctness_text(raw: &str) -> Result<bool> {
    match raw {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(EtlError::Record(format!("stored is_correct {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn correctness_is_stored_as_flag_text() {
        assert_eq!(correctness_text(true), "1");
        assert_eq!(correctness_text(false), "0");
        assert!(parse_correctness_text("1").unwrap());
        assert!(!parse_correctness_text("0").unwrap());
        assert!(parse_correctness_text("true").is_err());
    }

    #[tokio::test]
    async fn connect_without_database_url_is_a_config_error() {
        let mut config = Config::from_env();
        config.database_url = None;
        let err = AttemptStore::connect(&config).await.unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL pointing at a scratch Postgres"]
    async fn rows_round_trip_through_users_table() {
        let config = Config::from_env();
        let store = AttemptStore::connect(&config).await.unwrap();
        store.ensure_schema().await.unwrap();

        let prefix = Uuid::new_v4().to_string();
        let base = NaiveDate::from_ymd_opt(2023, 5, 31)
            .unwrap()
            .and_hms_micro_opt(9, 16, 11, 313_646)
            .unwrap();
        let inserted: Vec<NormalizedRow> = (0..5)
            .map(|i| NormalizedRow {
                user_id: format!("{prefix}-{i}"),
                oauth_consumer_key: String::new(),
                lis_result_sourcedid: format!("course-v1:SF+{i}"),
                lis_outcome_service_url: "https://lms.example/grade_handler".into(),
                is_correct: match i % 3 {
                    0 => Some(true),
                    1 => Some(false),
                    _ => None,
                },
                attempt_type: if i % 2 == 0 { "submit" } else { "run" }.into(),
                created_at: base + chrono::Duration::minutes(i),
            })
            .collect();

        assert_eq!(store.append(&inserted).await.unwrap(), 5);

        let read_back: Vec<NormalizedRow> = store
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|row| row.user_id.starts_with(&prefix))
            .collect();
        assert_eq!(read_back, inserted);

        store.close().await;
    }
}
