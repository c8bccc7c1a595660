use anyhow::Result;
use async_trait::async_trait;
use shared::{domain::DoctorId, protocol::DoctorProfile};
use storage::Storage;
use tokio::sync::Mutex;

/// The doctor a console session acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorIdentity {
    pub doctor_id: DoctorId,
    pub name: String,
    pub specialization: Option<String>,
    pub department_name: Option<String>,
}

impl From<DoctorProfile> for DoctorIdentity {
    fn from(profile: DoctorProfile) -> Self {
        Self {
            doctor_id: profile.doctor_id,
            name: profile.name,
            specialization: profile.specialization,
            department_name: profile.department_name,
        }
    }
}

/// Persisted doctor identity; survives restarts until cleared at sign-out.
#[async_trait]
pub trait DoctorSessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<DoctorIdentity>>;
    async fn save(&self, identity: &DoctorIdentity) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl DoctorSessionStore for Storage {
    async fn load(&self) -> Result<Option<DoctorIdentity>> {
        Ok(self.load_doctor_session().await?.map(|session| DoctorIdentity {
            doctor_id: session.doctor_id,
            name: session.name,
            specialization: session.specialization,
            department_name: session.department_name,
        }))
    }

    async fn save(&self, identity: &DoctorIdentity) -> Result<()> {
        self.save_doctor_session(
            identity.doctor_id,
            &identity.name,
            identity.specialization.as_deref(),
            identity.department_name.as_deref(),
        )
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.clear_doctor_session().await
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    identity: Mutex<Option<DoctorIdentity>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: DoctorIdentity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }
}

#[async_trait]
impl DoctorSessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<DoctorIdentity>> {
        Ok(self.identity.lock().await.clone())
    }

    async fn save(&self, identity: &DoctorIdentity) -> Result<()> {
        *self.identity.lock().await = Some(identity.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.identity.lock().await.take();
        Ok(())
    }
}
