use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolConfig, Runtime};
use tokio_postgres::{types::ToSql, NoTls, Row};

use super::DoctorStore;
use crate::{
    config::DatabaseSettings,
    doctor::{Doctor, DoctorRecord},
    Error,
};

refinery::embed_migrations!("migrations");

const COLUMNS: &str = "id, name, specialty, profile_url, image_url, location, phone, \
                       has_multiple_locations, is_employed_provider, is_accepting_new_patients, \
                       rating, rating_count";

/// [`DoctorStore`] backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(settings: &DatabaseSettings) -> Result<Self, Error> {
        let mut config = deadpool_postgres::Config::new();
        config.url = Some(settings.url.clone());
        config.pool = Some(PoolConfig::new(settings.max_connections));
        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        Ok(Self { pool })
    }

    /// Creates the `doctors` table if it does not exist yet.
    #[tracing::instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), Error> {
        let mut client = self.pool.get().await?;
        let report = migrations::runner().run_async(&mut **client).await?;
        for migration in report.applied_migrations() {
            tracing::info!(version = migration.version(), name = migration.name(), "applied migration");
        }
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PostgresStore {{ /* omitted */ }}")
    }
}

fn record_from_row(row: &Row) -> DoctorRecord {
    DoctorRecord {
        id: row.get("id"),
        doctor: Doctor {
            name: row.get("name"),
            specialty: row.get("specialty"),
            profile_url: row.get("profile_url"),
            image_url: row.get("image_url"),
            location: row.get("location"),
            phone: row.get("phone"),
            has_multiple_locations: row.get("has_multiple_locations"),
            is_employed_provider: row.get("is_employed_provider"),
            is_accepting_new_patients: row.get("is_accepting_new_patients"),
            rating: row.get("rating"),
            rating_count: row.get("rating_count"),
        },
    }
}

#[async_trait]
impl DoctorStore for PostgresStore {
    #[tracing::instrument(skip(self, doctor), fields(name = %doctor.name))]
    async fn save_doctor(&self, doctor: &Doctor) -> Result<i32, Error> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let existing = match doctor.profile_key() {
            Some(profile_url) => {
                // Saves of the same profile are serialized until commit.
                tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&profile_url])
                    .await?;
                tx.query_opt(
                    "SELECT id FROM doctors WHERE profile_url = $1 ORDER BY id LIMIT 1",
                    &[&profile_url],
                )
                .await?
                .map(|row| row.get::<_, i32>("id"))
            }
            None => None,
        };

        let fields: [&(dyn ToSql + Sync); 11] = [
            &doctor.name,
            &doctor.specialty,
            &doctor.profile_url,
            &doctor.image_url,
            &doctor.location,
            &doctor.phone,
            &doctor.has_multiple_locations,
            &doctor.is_employed_provider,
            &doctor.is_accepting_new_patients,
            &doctor.rating,
            &doctor.rating_count,
        ];

        let id = match existing {
            Some(id) => {
                tracing::debug!(id, "updating existing doctor");
                let mut params = fields.to_vec();
                params.push(&id);
                tx.execute(
                    "UPDATE doctors SET name = $1, specialty = $2, profile_url = $3, \
                     image_url = $4, location = $5, phone = $6, has_multiple_locations = $7, \
                     is_employed_provider = $8, is_accepting_new_patients = $9, rating = $10, \
                     rating_count = $11 \
                     WHERE id = $12",
                    &params,
                )
                .await?;
                id
            }
            None => tx
                .query_one(
                    "INSERT INTO doctors (name, specialty, profile_url, image_url, location, \
                     phone, has_multiple_locations, is_employed_provider, \
                     is_accepting_new_patients, rating, rating_count) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     RETURNING id",
                    &fields,
                )
                .await?
                .get("id"),
        };

        tx.commit().await?;
        Ok(id)
    }

    async fn all_doctors(&self) -> Result<Vec<DoctorRecord>, Error> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM doctors ORDER BY id");
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn doctor_by_id(&self, id: i32) -> Result<Option<DoctorRecord>, Error> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM doctors WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(record_from_row))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Barrier;

    use super::*;

    /// Connects to the database named by `DOCTOR_CRAWLER_TEST_DATABASE_URL`, if set.
    async fn test_store() -> Option<PostgresStore> {
        let url = std::env::var("DOCTOR_CRAWLER_TEST_DATABASE_URL").ok()?;
        let store = PostgresStore::new(&DatabaseSettings {
            url,
            max_connections: 16,
        })
        .unwrap();
        store.migrate().await.unwrap();
        Some(store)
    }

    fn unique_profile_url() -> String {
        format!("https://example.org/provider/{}", ulid::Ulid::new())
    }

    #[tokio::test]
    async fn concurrent_saves_of_one_profile_keep_a_single_row() {
        let Some(store) = test_store().await else {
            eprintln!("DOCTOR_CRAWLER_TEST_DATABASE_URL not set, skipping");
            return;
        };
        let store = Arc::new(store);
        let profile_url = unique_profile_url();
        let tasks = 16;
        let barrier = Arc::new(Barrier::new(tasks));

        let handles: Vec<_> = (0..tasks)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                let doctor = Doctor {
                    name: format!("Doctor {i}"),
                    profile_url: Some(profile_url.clone()),
                    ..Doctor::default()
                };
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.save_doctor(&doctor).await.unwrap()
                })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1, "{ids:?}");

        let rows: Vec<_> = store
            .all_doctors()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.doctor.profile_url.as_deref() == Some(profile_url.as_str()))
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, ids[0]);
    }

    #[tokio::test]
    async fn update_overwrites_every_column() {
        let Some(store) = test_store().await else {
            eprintln!("DOCTOR_CRAWLER_TEST_DATABASE_URL not set, skipping");
            return;
        };
        let profile_url = unique_profile_url();
        let rated = Doctor {
            name: "Jane Roe, MD".into(),
            profile_url: Some(profile_url.clone()),
            rating: Some(4.5),
            rating_count: Some(12),
            is_accepting_new_patients: true,
            ..Doctor::default()
        };
        let id = store.save_doctor(&rated).await.unwrap();

        let unrated = Doctor {
            name: "Jane Roe, DO".into(),
            profile_url: Some(profile_url),
            ..Doctor::default()
        };
        assert_eq!(store.save_doctor(&unrated).await.unwrap(), id);

        let stored = store.doctor_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.doctor, unrated);
    }
}
