//! Local view of a user's labs, reconciled against the backend.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use shared::{
    domain::{Lab, LabId, LabStatus, UserId},
    protocol::CreateLabRequest,
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::{api::LabApi, config::DEFAULT_LAB_DURATION_SECS, error::FetchError};

pub const LOAD_TYPES_FAILED: &str = "Failed to load lab types";
pub const LOAD_LABS_FAILED: &str = "Failed to load labs";
pub const DELETE_LAB_FAILED: &str = "Failed to delete lab";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("user id must not be empty")]
    MissingUserId,
    #[error("unknown lab type '{0}'")]
    UnknownLabType(String),
    #[error("a lab is already being created")]
    CreateInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    TypesLoaded {
        types: Vec<String>,
        selected: Option<String>,
    },
    LabsReplaced(Vec<Lab>),
    LabAdded(Lab),
    LabRemoved(LabId),
    LabStatusChanged { lab_id: LabId, status: LabStatus },
    BusyChanged(bool),
    ErrorChanged(Option<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSnapshot {
    pub user_id: String,
    pub lab_types: Vec<String>,
    pub selected_type: Option<String>,
    pub labs: Vec<Lab>,
    pub creating: bool,
    pub error: Option<String>,
}

impl CollectionSnapshot {
    pub fn lab(&self, lab_id: &LabId) -> Option<&Lab> {
        self.labs.iter().find(|lab| &lab.id == lab_id)
    }
}

/// Owns the lab set of the active user.
///
/// Every mutation keys on `Lab::id`. Entries leave the collection only after the
/// backend confirmed their deletion.
pub struct LabCollection {
    api: Arc<dyn LabApi>,
    default_duration_secs: u64,
    inner: Mutex<CollectionSnapshot>,
    /// Bumped under `inner` whenever the active user changes.
    user_epoch: AtomicU64,
    events: broadcast::Sender<CollectionEvent>,
}

impl LabCollection {
    pub fn new(api: Arc<dyn LabApi>) -> Self {
        Self::with_default_duration(api, DEFAULT_LAB_DURATION_SECS)
    }

    pub fn with_default_duration(api: Arc<dyn LabApi>, default_duration_secs: u64) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            api,
            default_duration_secs,
            inner: Mutex::new(CollectionSnapshot::default()),
            user_epoch: AtomicU64::new(0),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> CollectionSnapshot {
        self.inner.lock().await.clone()
    }

    pub async fn labs(&self) -> Vec<Lab> {
        self.inner.lock().await.labs.clone()
    }

    pub async fn lab(&self, lab_id: &LabId) -> Option<Lab> {
        self.inner.lock().await.lab(lab_id).cloned()
    }

    pub async fn error(&self) -> Option<String> {
        self.inner.lock().await.error.clone()
    }

    pub async fn is_creating(&self) -> bool {
        self.inner.lock().await.creating
    }

    fn emit(&self, event: CollectionEvent) {
        let _ = self.events.send(event);
    }

    fn set_error(&self, guard: &mut CollectionSnapshot, error: Option<String>) {
        if guard.error != error {
            guard.error = error.clone();
            self.emit(CollectionEvent::ErrorChanged(error));
        }
    }

    async fn surface_error(&self, message: String) {
        let mut guard = self.inner.lock().await;
        self.set_error(&mut guard, Some(message));
    }

    /// Records the active user; a change to a non-blank id reloads that user's labs.
    pub async fn set_user_id(&self, user_id: &str) -> Result<(), CollectionError> {
        let epoch = {
            let mut guard = self.inner.lock().await;
            if guard.user_id == user_id {
                None
            } else {
                guard.user_id = user_id.to_string();
                Some(self.user_epoch.fetch_add(1, Ordering::AcqRel) + 1)
            }
        };

        if let Some(epoch) = epoch.filter(|_| !user_id.trim().is_empty()) {
            self.load_labs(user_id, epoch).await?;
        }
        Ok(())
    }

    pub async fn load_types(&self) -> Result<Vec<String>, FetchError> {
        let types = match self.api.list_types().await {
            Ok(types) => types,
            Err(err) => {
                error!("labs: failed to load lab types: {err}");
                self.surface_error(LOAD_TYPES_FAILED.to_string()).await;
                return Err(err);
            }
        };

        let selected = types.first().cloned();
        {
            let mut guard = self.inner.lock().await;
            guard.lab_types = types.clone();
            guard.selected_type = selected.clone();
        }
        debug!("labs: loaded {} lab types", types.len());
        self.emit(CollectionEvent::TypesLoaded {
            types: types.clone(),
            selected,
        });
        Ok(types)
    }

    pub async fn select_type(&self, lab_type: &str) -> Result<(), CollectionError> {
        let mut guard = self.inner.lock().await;
        if !guard.lab_types.iter().any(|known| known == lab_type) {
            return Err(CollectionError::UnknownLabType(lab_type.to_string()));
        }
        guard.selected_type = Some(lab_type.to_string());
        Ok(())
    }

    /// Replaces the collection wholesale with the labs owned by `user_id`.
    ///
    /// A response that arrives after the active user changed is returned but not applied.
    pub async fn load_labs_for_user(&self, user_id: &str) -> Result<Vec<Lab>, FetchError> {
        let epoch = {
            let _guard = self.inner.lock().await;
            self.user_epoch.load(Ordering::Acquire)
        };
        self.load_labs(user_id, epoch).await
    }

    async fn load_labs(&self, user_id: &str, epoch: u64) -> Result<Vec<Lab>, FetchError> {
        let result = self.api.list_user_labs(&UserId::from(user_id)).await;

        let mut guard = self.inner.lock().await;
        if self.user_epoch.load(Ordering::Acquire) != epoch {
            debug!(
                "labs: dropping stale lab list user_id={user_id} active_user={}",
                guard.user_id
            );
            return result;
        }
        let labs = match result {
            Ok(labs) => dedupe_by_id(labs),
            Err(err) => {
                error!("labs: failed to load labs user_id={user_id}: {err}");
                self.set_error(&mut guard, Some(LOAD_LABS_FAILED.to_string()));
                return Err(err);
            }
        };
        guard.labs = labs.clone();
        self.set_error(&mut guard, None);
        drop(guard);

        info!("labs: loaded {} labs user_id={user_id}", labs.len());
        self.emit(CollectionEvent::LabsReplaced(labs.clone()));
        Ok(labs)
    }

    /// Creates a lab; at most one create request is in flight at a time.
    pub async fn create_lab(
        &self,
        user_id: &str,
        lab_type: &str,
        duration_secs: u64,
    ) -> Result<Lab, CollectionError> {
        let user_id = user_id.trim();
        {
            let mut guard = self.inner.lock().await;
            if guard.creating {
                debug!("labs: create ignored, another create is in flight");
                return Err(CollectionError::CreateInFlight);
            }
            if user_id.is_empty() {
                return Err(CollectionError::MissingUserId);
            }
            if lab_type.is_empty() || !guard.lab_types.iter().any(|known| known == lab_type) {
                return Err(CollectionError::UnknownLabType(lab_type.to_string()));
            }
            guard.creating = true;
            self.set_error(&mut guard, None);
        }
        self.emit(CollectionEvent::BusyChanged(true));

        let result = self
            .api
            .create_lab(CreateLabRequest {
                user_id: UserId::from(user_id),
                lab_type: lab_type.to_string(),
                duration: duration_secs,
            })
            .await;

        let mut guard = self.inner.lock().await;
        guard.creating = false;
        let outcome = match result {
            Ok(lab) => {
                info!(
                    "labs: created lab_id={} lab_type={} user_id={user_id}",
                    lab.id, lab.lab_type
                );
                if let Some(existing) = guard.labs.iter_mut().find(|known| known.id == lab.id) {
                    *existing = lab.clone();
                } else {
                    guard.labs.push(lab.clone());
                }
                self.emit(CollectionEvent::LabAdded(lab.clone()));
                Ok(lab)
            }
            Err(err) => {
                error!("labs: failed to create lab user_id={user_id} lab_type={lab_type}: {err}");
                self.set_error(&mut guard, Some(format!("Failed to create lab: {}", err.reason())));
                Err(CollectionError::Fetch(err))
            }
        };
        drop(guard);
        self.emit(CollectionEvent::BusyChanged(false));
        outcome
    }

    /// Creates a lab for the active user with the selected type and default duration.
    pub async fn create_selected_lab(&self) -> Result<Lab, CollectionError> {
        let (user_id, lab_type) = {
            let guard = self.inner.lock().await;
            (guard.user_id.clone(), guard.selected_type.clone())
        };
        let lab_type = lab_type.ok_or_else(|| CollectionError::UnknownLabType(String::new()))?;
        self.create_lab(&user_id, &lab_type, self.default_duration_secs)
            .await
    }

    /// Removes `lab_id` only after the backend confirmed the deletion.
    pub async fn delete_lab(&self, lab_id: &LabId) -> Result<(), FetchError> {
        if let Err(err) = self.api.delete_lab(lab_id).await {
            error!("labs: failed to delete lab_id={lab_id}: {err}");
            self.surface_error(DELETE_LAB_FAILED.to_string()).await;
            return Err(err);
        }

        let removed = {
            let mut guard = self.inner.lock().await;
            let before = guard.labs.len();
            guard.labs.retain(|lab| &lab.id != lab_id);
            guard.labs.len() != before
        };
        if removed {
            info!("labs: deleted lab_id={lab_id}");
            self.emit(CollectionEvent::LabRemoved(lab_id.clone()));
        } else {
            debug!("labs: deleted lab_id={lab_id} was no longer tracked");
        }
        Ok(())
    }

    /// Updates the status of `lab_id` in place. Failures are logged and never touch the error banner.
    pub async fn refresh_status(&self, lab_id: &LabId) -> Option<LabStatus> {
        let status = match self.api.lab_status(lab_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!("labs: status refresh failed lab_id={lab_id}: {err}");
                return None;
            }
        };

        let changed = {
            let mut guard = self.inner.lock().await;
            match guard.labs.iter_mut().find(|lab| &lab.id == lab_id) {
                Some(lab) => {
                    let changed = lab.status != status;
                    lab.status = status.clone();
                    changed
                }
                None => {
                    debug!("labs: status for untracked lab_id={lab_id} dropped");
                    return None;
                }
            }
        };
        if changed {
            self.emit(CollectionEvent::LabStatusChanged {
                lab_id: lab_id.clone(),
                status: status.clone(),
            });
        }
        Some(status)
    }
}

fn dedupe_by_id(labs: Vec<Lab>) -> Vec<Lab> {
    let mut unique: Vec<Lab> = Vec::with_capacity(labs.len());
    for lab in labs {
        match unique.iter_mut().find(|known| known.id == lab.id) {
            Some(existing) => *existing = lab,
            None => unique.push(lab),
        }
    }
    unique
}

#[cfg(test)]
#[path = "tests/collection_tests.rs"]
mod tests;
