//! Decision loop against a recording adapter and a stub patch backend.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use secops_common::config_store::read_document;
use secops_common::{ConfigPatch, ConfigStore, HostOs, NotifierConfig, RebootPolicy};
use secopsd::controller::TickError;
use secopsd::{
    Controller, LoopState, PatchTaskClient, ScheduleRequest, SchedulerError, SchedulingAdapter,
    Settings,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Schedule(ScheduleRequest),
    RebootNow(String),
    Cancel,
    Cleanup,
}

#[derive(Clone, Default)]
struct RecordingAdapter {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: Arc<AtomicBool>,
    /// Document to corrupt once the reboot window starts
    corrupt_on_reboot: Arc<Mutex<Option<PathBuf>>>,
}

impl RecordingAdapter {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) -> Result<(), SchedulerError> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SchedulerError::Command {
                op: "test",
                detail: "adapter down".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SchedulingAdapter for RecordingAdapter {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn schedule_action(&self, request: &ScheduleRequest) -> Result<(), SchedulerError> {
        self.record(Call::Schedule(request.clone()))
    }

    async fn schedule_reboot_now(&self, custom_message: &str) -> Result<(), SchedulerError> {
        if let Some(path) = self.corrupt_on_reboot.lock().unwrap().take() {
            std::fs::write(path, b"{ half written").unwrap();
        }
        self.record(Call::RebootNow(custom_message.to_string()))
    }

    async fn cancel_action(&self) -> Result<(), SchedulerError> {
        self.record(Call::Cancel)
    }

    async fn cleanup(&self) -> Result<(), SchedulerError> {
        self.record(Call::Cleanup)
    }
}

struct Harness {
    _temp: TempDir,
    store: Arc<ConfigStore>,
    adapter: RecordingAdapter,
    controller: Controller,
}

impl Harness {
    fn new(base_url: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(ConfigStore::new(
            temp.path().join("SecOpsNotifierConfig.json"),
            "2.0.0",
        ));
        store.load().unwrap();
        store
            .update(&ConfigPatch {
                base_url: Some(base_url.to_string()),
                asset: Some("web-01".to_string()),
                asset_type: Some("server".to_string()),
                ..Default::default()
            })
            .unwrap();

        let adapter = RecordingAdapter::default();
        let controller = Controller::new(
            Arc::clone(&store),
            Box::new(adapter.clone()),
            PatchTaskClient::new(Duration::from_secs(5)),
            HostOs::Linux,
            Settings::default(),
        );
        Self {
            _temp: temp,
            store,
            adapter,
            controller,
        }
    }

    fn set(&self, patch: ConfigPatch) {
        self.store.update(&patch).unwrap();
    }

    fn on_disk(&self) -> NotifierConfig {
        read_document(self.store.path()).unwrap()
    }
}

fn noon() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

async fn patch_backend(running: bool) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "running_patch_status": running
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_graceful_policy_schedules_fifteen_minutes_out() {
    let h = Harness::new("http://127.0.0.1:1");

    let state = h.controller.tick_at(noon()).await.unwrap();
    assert_eq!(state, LoopState::TaskScheduled);

    let doc = h.on_disk();
    assert!(doc.task_scheduled);
    assert_eq!(doc.scheduled_time, "2024-05-01 12:15:00");
    assert_eq!(
        h.adapter.calls(),
        vec![Call::Schedule(ScheduleRequest {
            scheduled_time: Some("2024-05-01 12:15:00".to_string()),
            custom_message: doc.custom_message.clone(),
        })]
    );
}

#[tokio::test]
async fn test_force_policy_schedules_five_minutes_out() {
    let h = Harness::new("http://127.0.0.1:1");
    h.set(ConfigPatch {
        reboot_config: Some(RebootPolicy::ForceReboot),
        ..Default::default()
    });

    h.controller.tick_at(noon()).await.unwrap();
    assert_eq!(h.on_disk().scheduled_time, "2024-05-01 12:05:00");
}

#[tokio::test]
async fn test_explicit_time_is_kept() {
    let h = Harness::new("http://127.0.0.1:1");
    h.set(ConfigPatch {
        scheduled_time: Some("2024-05-02 03:00:00".to_string()),
        ..Default::default()
    });

    h.controller.tick_at(noon()).await.unwrap();
    assert_eq!(h.on_disk().scheduled_time, "2024-05-02 03:00:00");
    assert!(matches!(
        &h.adapter.calls()[..],
        [Call::Schedule(ScheduleRequest { scheduled_time: Some(t), .. })] if t == "2024-05-02 03:00:00"
    ));
}

#[tokio::test]
async fn test_scheduled_task_is_not_rescheduled() {
    let h = Harness::new("http://127.0.0.1:1");

    h.controller.tick_at(noon()).await.unwrap();
    let state = h.controller.tick_at(noon()).await.unwrap();

    assert_eq!(state, LoopState::TaskScheduled);
    assert_eq!(h.adapter.calls().len(), 1);
}

#[tokio::test]
async fn test_adapter_failure_leaves_task_unscheduled() {
    let h = Harness::new("http://127.0.0.1:1");
    h.adapter.fail.store(true, Ordering::SeqCst);

    let state = h.controller.tick_at(noon()).await.unwrap();
    assert_eq!(state, LoopState::GracefulSchedulePending);
    assert!(!h.on_disk().task_scheduled);

    // Retried on the next tick once the adapter recovers
    h.adapter.fail.store(false, Ordering::SeqCst);
    let state = h.controller.tick_at(noon()).await.unwrap();
    assert_eq!(state, LoopState::TaskScheduled);
    assert!(h.on_disk().task_scheduled);
}

#[tokio::test]
async fn test_reboot_now_waits_while_patch_runs() {
    let server = patch_backend(true).await;
    let h = Harness::new(&server.uri());
    h.set(ConfigPatch {
        reboot_now: Some(true),
        ..Default::default()
    });

    let state = h.controller.tick_at(noon()).await.unwrap();
    assert_eq!(state, LoopState::WaitingForPatchIdle);

    let doc = h.on_disk();
    assert!(doc.reboot_now);
    assert!(!doc.task_scheduled);
    assert_eq!(h.adapter.calls(), vec![Call::Cancel]);
}

#[tokio::test]
async fn test_reboot_now_forces_reboot_when_idle() {
    let server = patch_backend(false).await;
    let h = Harness::new(&server.uri());
    h.set(ConfigPatch {
        reboot_now: Some(true),
        custom_message: Some("Kernel update".to_string()),
        ..Default::default()
    });

    let state = h.controller.tick_at(noon()).await.unwrap();
    assert_eq!(state, LoopState::ForceRebootPending);

    let doc = h.on_disk();
    assert!(!doc.reboot_now);
    assert!(doc.task_scheduled);
    assert_eq!(
        h.adapter.calls(),
        vec![Call::Cancel, Call::RebootNow("Kernel update".to_string())]
    );

    // Nothing more to do afterwards
    assert_eq!(
        h.controller.tick_at(noon()).await.unwrap(),
        LoopState::TaskScheduled
    );
}

#[tokio::test]
async fn test_failed_write_after_reboot_start_does_not_relaunch() {
    let h = Harness::new("http://127.0.0.1:1");
    h.set(ConfigPatch {
        reboot_now: Some(true),
        ..Default::default()
    });
    let good = h.on_disk();
    *h.adapter.corrupt_on_reboot.lock().unwrap() = Some(h.store.path().to_path_buf());

    assert!(matches!(
        h.controller.tick_at(noon()).await,
        Err(TickError::Update(_))
    ));

    // The document comes back with the flag still raised
    std::fs::write(h.store.path(), serde_json::to_vec_pretty(&good).unwrap()).unwrap();
    assert_eq!(
        h.controller.tick_at(noon()).await.unwrap(),
        LoopState::ForceRebootPending
    );

    let doc = h.on_disk();
    assert!(!doc.reboot_now);
    assert!(doc.task_scheduled);
    let launches = h
        .adapter
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::RebootNow(_)))
        .count();
    assert_eq!(launches, 1);
}

#[tokio::test]
async fn test_unreachable_backend_counts_as_idle() {
    let h = Harness::new("http://127.0.0.1:1");
    h.set(ConfigPatch {
        reboot_now: Some(true),
        ..Default::default()
    });

    assert_eq!(
        h.controller.tick_at(noon()).await.unwrap(),
        LoopState::ForceRebootPending
    );
}

#[tokio::test]
async fn test_external_edits_survive_controller_writes() {
    let h = Harness::new("http://127.0.0.1:1");
    h.set(ConfigPatch {
        delay_counter: Some(1),
        ..Default::default()
    });

    h.controller.tick_at(noon()).await.unwrap();

    let doc = h.on_disk();
    assert!(doc.task_scheduled);
    assert_eq!(doc.delay_counter, 1);
    assert_eq!(doc.base_url, "http://127.0.0.1:1");
}

#[tokio::test]
async fn test_corrupt_document_is_a_reload_error() {
    let h = Harness::new("http://127.0.0.1:1");
    std::fs::write(h.store.path(), b"{ not json").unwrap();

    assert!(matches!(
        h.controller.tick_at(noon()).await,
        Err(TickError::Reload(_))
    ));
    assert!(h.adapter.calls().is_empty());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = Harness::new("http://127.0.0.1:1");
    let shutdown = Arc::new(tokio::sync::Notify::new());
    // notify_one stores a permit, so the loop sees it at its first pause
    shutdown.notify_one();

    tokio::time::timeout(Duration::from_secs(5), h.controller.run(shutdown))
        .await
        .unwrap();
    assert!(h.on_disk().task_scheduled);
}
