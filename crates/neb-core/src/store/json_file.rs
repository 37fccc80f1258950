use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Records, Store};
use crate::{
    domain::{ClientConfig, ServiceId, ServiceRecord, UserId},
    Result,
};

#[derive(Serialize, Deserialize)]
struct StoreFileData {
    #[serde(default)]
    saved_at: Option<String>,
    #[serde(flatten)]
    records: Records,
}

/// Store backed by a single JSON document.
///
/// The whole document is rewritten on every mutation (temp file + rename), which
/// is fine for the handful of identities and services a host carries.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = load_store_file(&path).await?.unwrap_or_default();
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<T>(&self, f: impl FnOnce(&mut Records) -> T) -> Result<T> {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next);
        save_store_file(&self.path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

async fn load_store_file(path: &Path) -> Result<Option<Records>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let txt = tokio::fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let data: StoreFileData = serde_json::from_str(&txt)?;
    Ok(Some(data.records))
}

async fn save_store_file(path: &Path, records: &Records) -> Result<()> {
    let data = StoreFileData {
        saved_at: Some(chrono::Utc::now().to_rfc3339()),
        records: records.clone(),
    };
    let txt = serde_json::to_string_pretty(&data)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, txt).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load_client_config(&self, user_id: &UserId) -> Result<Option<ClientConfig>> {
        Ok(self.records.lock().await.client(user_id))
    }

    async fn store_client_config(&self, config: ClientConfig) -> Result<Option<ClientConfig>> {
        self.mutate(|r| r.put_client(config)).await
    }

    async fn load_client_configs(&self) -> Result<Vec<ClientConfig>> {
        Ok(self.records.lock().await.clients.clone())
    }

    async fn load_service(&self, id: &ServiceId) -> Result<Option<ServiceRecord>> {
        Ok(self.records.lock().await.service(id))
    }

    async fn load_services_for_user(&self, user_id: &UserId) -> Result<Vec<ServiceRecord>> {
        Ok(self.records.lock().await.services_for(user_id))
    }

    async fn store_service(&self, record: ServiceRecord) -> Result<Option<ServiceRecord>> {
        self.mutate(|r| r.put_service(record)).await
    }

    async fn load_services(&self) -> Result<Vec<ServiceRecord>> {
        Ok(self.records.lock().await.services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoomId;

    fn tmp(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}.json", std::process::id()))
    }

    fn client(user: &str) -> ClientConfig {
        ClientConfig {
            user_id: UserId::from(user),
            homeserver_url: "https://hs.example".to_string(),
            access_token: "secret".to_string(),
            device_id: "DEV".to_string(),
            sync: true,
            auto_join_rooms: true,
            display_name: Some("Bot".to_string()),
            accept_verification_from_users: vec![],
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let path = tmp("neb-store");
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            assert!(store
                .store_client_config(client("@a:x"))
                .await
                .unwrap()
                .is_none());
            store
                .store_service(ServiceRecord {
                    id: ServiceId::from("echo-1"),
                    service_type: "echo".to_string(),
                    user_id: UserId::from("@a:x"),
                    rooms: vec![RoomId::from("!r:x")],
                    config: serde_json::json!({}),
                })
                .await
                .unwrap();
        }

        let store = JsonFileStore::open(&path).await.unwrap();
        let cfg = store
            .load_client_config(&UserId::from("@a:x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cfg, client("@a:x"));
        assert_eq!(
            store
                .load_services_for_user(&UserId::from("@a:x"))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .load_service(&ServiceId::from("missing"))
            .await
            .unwrap()
            .is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let path = tmp("neb-store-empty");
        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.load_client_configs().await.unwrap().is_empty());
        assert!(!path.exists());
    }
}
