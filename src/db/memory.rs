use async_trait::async_trait;
use tokio::sync::Mutex;

use super::DoctorStore;
use crate::{
    doctor::{Doctor, DoctorRecord},
    Error,
};

/// In-process [`DoctorStore`], used for dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<DoctorRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DoctorStore for MemoryStore {
    async fn save_doctor(&self, doctor: &Doctor) -> Result<i32, Error> {
        let mut rows = self.rows.lock().await;
        if let Some(key) = doctor.profile_key() {
            if let Some(existing) = rows
                .iter_mut()
                .find(|row| row.doctor.profile_url.as_deref() == Some(key))
            {
                existing.doctor = doctor.clone();
                return Ok(existing.id);
            }
        }
        let id = rows.last().map_or(1, |row| row.id + 1);
        rows.push(DoctorRecord {
            id,
            doctor: doctor.clone(),
        });
        Ok(id)
    }

    async fn all_doctors(&self) -> Result<Vec<DoctorRecord>, Error> {
        Ok(self.rows.lock().await.clone())
    }

    async fn doctor_by_id(&self, id: i32) -> Result<Option<DoctorRecord>, Error> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|row| row.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Barrier;

    use super::*;

    fn doctor(name: &str, profile_url: Option<&str>) -> Doctor {
        Doctor {
            profile_url: profile_url.map(String::from),
            ..Doctor::new(name)
        }
    }

    #[tokio::test]
    async fn same_profile_url_updates_in_place() {
        let store = MemoryStore::new();
        let url = Some("https://example.org/provider/a");
        let first = store.save_doctor(&doctor("A", url)).await.unwrap();

        let mut changed = doctor("A. Renamed", url);
        changed.phone = Some("3345550100".into());
        let second = store.save_doctor(&changed).await.unwrap();

        assert_eq!(first, second);
        let all = store.all_doctors().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].doctor, changed);
    }

    #[tokio::test]
    async fn update_clears_missing_fields() {
        let store = MemoryStore::new();
        let url = Some("https://example.org/provider/a");
        let mut rated = doctor("A", url);
        rated.rating = Some(4.5);
        rated.rating_count = Some(12);
        let id = store.save_doctor(&rated).await.unwrap();
        store.save_doctor(&doctor("A", url)).await.unwrap();

        let stored = store.doctor_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.doctor.rating, None);
        assert_eq!(stored.doctor.rating_count, None);
    }

    #[tokio::test]
    async fn doctors_without_profile_url_are_always_inserted() {
        let store = MemoryStore::new();
        let a = store.save_doctor(&doctor("A", None)).await.unwrap();
        let b = store.save_doctor(&doctor("A", None)).await.unwrap();
        let c = store.save_doctor(&doctor("A", Some(""))).await.unwrap();
        let d = store.save_doctor(&doctor("A", Some(""))).await.unwrap();
        assert_eq!(vec![a, b, c, d], vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let store = MemoryStore::new();
        store.save_doctor(&doctor("A", None)).await.unwrap();
        let id = store.save_doctor(&doctor("B", None)).await.unwrap();
        let found = store.doctor_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.doctor.name, "B");
        assert!(store.doctor_by_id(99).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_of_one_profile_keep_a_single_row() {
        let store = Arc::new(MemoryStore::new());
        let tasks = 16;
        let barrier = Arc::new(Barrier::new(tasks));
        let handles: Vec<_> = (0..tasks)
            .map(|i| {
                let store = store.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    let name = format!("Doctor {i}");
                    store
                        .save_doctor(&doctor(&name, Some("https://example.org/provider/a")))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(store.all_doctors().await.unwrap().len(), 1);
    }
}
