use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use shared::{
    domain::{Lab, LabId, LabStatus, UserId},
    protocol::{CommandResultResponse, CreateLabRequest, ExecuteCommandRequest},
};
use tokio::sync::{oneshot, Mutex, Notify};

use crate::{api::LabApi, error::FetchError};

pub(crate) fn sample_lab(id: &str, status: LabStatus) -> Lab {
    Lab {
        id: LabId::from(id),
        user_id: Some(UserId::from("u1")),
        lab_type: "docker".to_string(),
        status,
        created_at: Some(Utc::now()),
        expires_at: Utc::now() + ChronoDuration::seconds(7200),
        access_url: format!("https://labs.example/{id}"),
        pod_name: None,
    }
}

pub(crate) fn command_result(success: bool, output: &str, error: &str, exit_code: i32) -> CommandResultResponse {
    CommandResultResponse {
        command: None,
        success,
        output: output.to_string(),
        error: error.to_string(),
        exit_code: Some(exit_code),
    }
}

pub(crate) fn server_error() -> FetchError {
    FetchError::Status {
        status: 500,
        body: "internal error".to_string(),
    }
}

/// Scripted backend. Create, execute and per-user list calls can be held open with a gate.
pub(crate) struct FakeLabApi {
    pub types: Mutex<Result<Vec<String>, FetchError>>,
    pub labs: Mutex<Result<Vec<Lab>, FetchError>>,
    pub labs_by_user: Mutex<HashMap<String, Vec<Lab>>>,
    pub create_result: Mutex<Result<Lab, FetchError>>,
    pub delete_result: Mutex<Result<(), FetchError>>,
    pub status_result: Mutex<Result<LabStatus, FetchError>>,
    pub execute_results: Mutex<VecDeque<Result<CommandResultResponse, FetchError>>>,
    pub suggestions: Mutex<Result<Vec<String>, FetchError>>,
    pub create_entered: Notify,
    pub execute_entered: Notify,
    pub list_entered: Notify,
    list_gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    create_gate: Mutex<Option<oneshot::Receiver<()>>>,
    execute_gate: Mutex<Option<oneshot::Receiver<()>>>,
    calls: Mutex<Vec<String>>,
    executed: Mutex<Vec<ExecuteCommandRequest>>,
}

impl FakeLabApi {
    pub fn new() -> Self {
        Self {
            types: Mutex::new(Ok(vec!["docker".to_string(), "python".to_string()])),
            labs: Mutex::new(Ok(Vec::new())),
            labs_by_user: Mutex::new(HashMap::new()),
            create_result: Mutex::new(Ok(sample_lab("lab-1", LabStatus::Creating))),
            delete_result: Mutex::new(Ok(())),
            status_result: Mutex::new(Ok(LabStatus::Running)),
            execute_results: Mutex::new(VecDeque::new()),
            suggestions: Mutex::new(Ok(vec!["ls -la".to_string()])),
            create_entered: Notify::new(),
            execute_entered: Notify::new(),
            list_entered: Notify::new(),
            list_gates: Mutex::new(HashMap::new()),
            create_gate: Mutex::new(None),
            execute_gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub async fn hold_create(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.create_gate.lock().await = Some(gate);
        release
    }

    pub async fn hold_execute(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.execute_gate.lock().await = Some(gate);
        release
    }

    pub async fn hold_list_labs(&self, user_id: &str) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.list_gates.lock().await.insert(user_id.to_string(), gate);
        release
    }

    pub async fn push_execute(&self, result: Result<CommandResultResponse, FetchError>) {
        self.execute_results.lock().await.push_back(result);
    }

    pub async fn calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.as_str() == name)
            .count()
    }

    pub async fn executed_commands(&self) -> Vec<String> {
        self.executed
            .lock()
            .await
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }

    async fn record(&self, name: &str) {
        self.calls.lock().await.push(name.to_string());
    }
}

#[async_trait]
impl LabApi for FakeLabApi {
    async fn list_types(&self) -> Result<Vec<String>, FetchError> {
        self.record("list_types").await;
        self.types.lock().await.clone()
    }

    async fn list_user_labs(&self, user_id: &UserId) -> Result<Vec<Lab>, FetchError> {
        self.record("list_user_labs").await;
        self.list_entered.notify_one();
        let gate = self.list_gates.lock().await.remove(user_id.as_str());
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(labs) = self.labs_by_user.lock().await.get(user_id.as_str()) {
            return Ok(labs.clone());
        }
        self.labs.lock().await.clone()
    }

    async fn create_lab(&self, _request: CreateLabRequest) -> Result<Lab, FetchError> {
        self.record("create_lab").await;
        self.create_entered.notify_one();
        let gate = self.create_gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.create_result.lock().await.clone()
    }

    async fn delete_lab(&self, _lab_id: &LabId) -> Result<(), FetchError> {
        self.record("delete_lab").await;
        self.delete_result.lock().await.clone()
    }

    async fn lab_status(&self, _lab_id: &LabId) -> Result<LabStatus, FetchError> {
        self.record("lab_status").await;
        self.status_result.lock().await.clone()
    }

    async fn execute_command(
        &self,
        request: ExecuteCommandRequest,
    ) -> Result<CommandResultResponse, FetchError> {
        self.record("execute_command").await;
        self.executed.lock().await.push(request);
        self.execute_entered.notify_one();
        let gate = self.execute_gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.execute_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(command_result(true, "", "", 0)))
    }

    async fn suggested_commands(&self, _lab_id: &LabId) -> Result<Vec<String>, FetchError> {
        self.record("suggested_commands").await;
        self.suggestions.lock().await.clone()
    }
}
