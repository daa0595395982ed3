use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use generation_dispatch::{
    CapabilityId, DispatchEngine, EngineConfig, EngineEvent, FetchError, GenerationTask,
    InputReference, MediaType, MemoryGraph, ProviderPayload, SubmitError, Submission, TaskId,
    TaskService, TaskStatus, UploadError, Uploader,
};

/// Pretends to render: two "swapping" ticks, then done.
struct FakeService {
    ticks: AtomicU32,
}

#[async_trait]
impl TaskService for FakeService {
    async fn submit(&self, payload: &ProviderPayload) -> Result<TaskId, SubmitError> {
        println!("Submitting: {}", payload.snapshot());
        Ok(TaskId::new("demo-task"))
    }

    async fn fetch_status(&self, task_id: &TaskId) -> Result<GenerationTask, FetchError> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        let (status, progress, output_url) = match tick {
            0 => (TaskStatus::Pending, 0, None),
            1 | 2 => (TaskStatus::parse("swapping"), 40 * tick as u8, None),
            _ => (
                TaskStatus::Completed,
                100,
                Some("https://cdn.example.com/result.mp4".to_string()),
            ),
        };
        Ok(GenerationTask {
            id: task_id.clone(),
            capability_id: None,
            status,
            progress,
            status_message: None,
            output_url,
            error_message: None,
        })
    }

    async fn cancel(&self, _task_id: &TaskId) -> Result<(), FetchError> {
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}

struct FakeUploader;

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        file_name: &str,
        _content_type: &str,
        data: Arc<Vec<u8>>,
    ) -> Result<String, UploadError> {
        println!("Uploading {} ({} bytes)", file_name, data.len());
        Ok(format!("https://cdn.example.com/uploads/{}", file_name))
    }
}

#[tokio::main]
async fn main() -> generation_dispatch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "generation_dispatch=debug".into()),
        )
        .init();

    let config = EngineConfig::builder()
        .with_poll_interval(Duration::from_millis(500))
        .with_max_poll_attempts(20)
        .build();
    let graph = MemoryGraph::new();
    let engine = DispatchEngine::builder(config)
        .with_task_service(Arc::new(FakeService {
            ticks: AtomicU32::new(0),
        }))
        .with_uploader(Arc::new(FakeUploader))
        .with_graph(graph.clone())
        .build()?;

    let mut events = engine.subscribe();
    let surface = engine.open_surface();

    let submitted = engine
        .submit(
            Submission::new(CapabilityId::FaceSwap)
                .with_inputs(vec![
                    InputReference::hosted(MediaType::Video, "https://cdn.example.com/scene.mp4"),
                    InputReference::local(MediaType::Image, "face.png", "image/png", vec![0; 64])
                        .with_role("face"),
                ])
                .on_surface(&surface),
        )
        .await?;
    println!("Placeholder {} created", submitted.placeholder.node_id);

    while let Ok(event) = events.recv().await {
        match &event {
            EngineEvent::Progress(p) => println!("{} {}%", p.status, p.progress),
            EngineEvent::Completed(c) => println!("Done: {:?}", c.output_url),
            other => println!("{:?}", other),
        }
        if event.is_terminal() {
            break;
        }
    }

    if let Some(node) = graph.node(&submitted.placeholder.node_id) {
        println!("Final node: {:?}", node);
    }

    engine.close_surface(&surface);
    engine.shutdown().await;
    Ok(())
}
