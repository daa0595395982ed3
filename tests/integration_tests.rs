
use std::time::Duration;

use generation_dispatch::*;
use tempfile::tempdir;
use test_helpers::*;

fn processing_then_done() -> Vec<Step> {
    let mut script = vec![Step::Status("pending", 0); 2];
    script.extend(vec![Step::Status("processing", 40); 6]);
    script.push(Step::Completed("https://cdn.test/out.mp4"));
    script
}

#[tokio::test(start_paused = true)]
async fn test_submit_poll_and_upgrade_once() {
    let h = harness(processing_then_done(), 120);
    let mut events = h.engine.subscribe();
    let started = tokio::time::Instant::now();

    let submitted = h
        .engine
        .submit(
            Submission::new(CapabilityId::ImageToVideo)
                .with_inputs(vec![image("https://cdn.test/cat.png")]),
        )
        .await
        .unwrap();
    assert_eq!(submitted.task.status, TaskStatus::Pending);
    assert_eq!(h.engine.active_polls(), vec![submitted.task.id.clone()]);

    let seen = events_until_terminal(&mut events, &submitted.task.id).await;
    assert_eq!(started.elapsed(), Duration::from_secs(27));
    assert!(matches!(seen.first(), Some(EngineEvent::Submitted(_))));

    let progress: Vec<u8> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Progress(p) => Some(p.progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0, 40]);

    match seen.last() {
        Some(EngineEvent::Completed(done)) => {
            assert_eq!(done.output_url.as_deref(), Some("https://cdn.test/out.mp4"));
            assert_eq!(done.node_id, submitted.placeholder.node_id);
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let node = h.graph.node(&submitted.placeholder.node_id).unwrap();
    assert_eq!(node.status, "completed");
    let upgrades = h
        .graph
        .ops()
        .into_iter()
        .filter(|op| matches!(op, GraphOp::Updated(_, NodePatch::Completed { .. })))
        .count();
    assert_eq!(upgrades, 1);
    assert_eq!(
        h.engine.placeholder_state(&submitted.task.id).await.unwrap(),
        Some(PlaceholderState::Upgraded)
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.engine.active_polls().is_empty());
}

#[tokio::test]
async fn test_multi_image_with_one_image_never_hits_network() {
    let h = harness(processing_then_done(), 120);

    let err = h
        .engine
        .submit(
            Submission::new(CapabilityId::MultiImageToVideo)
                .with_inputs(vec![local_image("only.png")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Validation(ValidationError::InsufficientInputs { needed: 2 })
    ));
    assert_eq!(h.uploader.count(), 0);
    assert_eq!(h.service.submit_count(), 0);
    assert!(h.graph.is_empty());
}

#[tokio::test]
async fn test_text_to_video_requires_prompt() {
    let h = harness(processing_then_done(), 120);

    let err = h
        .engine
        .submit(Submission::new(CapabilityId::TextToVideo).with_prompt("   "))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Validation(ValidationError::PromptRequired)
    ));
    assert_eq!(h.service.submit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_never_terminal_times_out_and_marks_failed() {
    let h = harness(vec![Step::Status("processing", 10)], 5);
    let mut events = h.engine.subscribe();

    let submitted = h
        .engine
        .submit(Submission::new(CapabilityId::TextToVideo).with_prompt("a comet over the sea"))
        .await
        .unwrap();

    let seen = events_until_terminal(&mut events, &submitted.task.id).await;
    match seen.last() {
        Some(EngineEvent::Failed(failed)) => {
            assert!(failed.timed_out);
            assert!(failed.error.contains("timed out"));
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    let node = h.graph.node(&submitted.placeholder.node_id).unwrap();
    assert_eq!(node.status, "failed");
    assert!(node.error.unwrap().contains("timed out"));
    assert_eq!(h.service.fetch_count(&submitted.task.id), 5);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_do_not_stop_polling() {
    let h = harness(
        vec![
            Step::Unreachable,
            Step::Status("processing", 30),
            Step::Unreachable,
            Step::Unreachable,
            Step::Completed("https://cdn.test/restyled.png"),
        ],
        120,
    );
    let mut events = h.engine.subscribe();

    let submitted = h
        .engine
        .submit(
            Submission::new(CapabilityId::ImageRestyle)
                .with_inputs(vec![image("https://cdn.test/in.png")])
                .with_prompt("watercolor"),
        )
        .await
        .unwrap();

    let seen = events_until_terminal(&mut events, &submitted.task.id).await;
    assert!(matches!(seen.last(), Some(EngineEvent::Completed(_))));
    assert_eq!(h.service.fetch_count(&submitted.task.id), 5);
}

#[tokio::test(start_paused = true)]
async fn test_service_failure_keeps_failed_placeholder() {
    let h = harness(
        vec![Step::Status("swapping", 50), Step::Failed("No face detected")],
        120,
    );
    let mut events = h.engine.subscribe();

    let submitted = h
        .engine
        .submit(Submission::new(CapabilityId::FaceSwap).with_inputs(vec![
            InputReference::hosted(MediaType::Video, "https://cdn.test/scene.mp4"),
            image("https://cdn.test/face.png").with_role("face"),
        ]))
        .await
        .unwrap();

    let seen = events_until_terminal(&mut events, &submitted.task.id).await;
    let sub_status = seen.iter().find_map(|e| match e {
        EngineEvent::Progress(p) => Some(p.status.clone()),
        _ => None,
    });
    assert_eq!(sub_status.as_deref(), Some("swapping"));

    match seen.last() {
        Some(EngineEvent::Failed(failed)) => {
            assert_eq!(failed.error, "No face detected");
            assert!(!failed.timed_out);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.graph.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_closing_surface_cancels_and_removes_placeholder() {
    let h = harness(vec![Step::Status("processing", 20)], 120);
    let mut events = h.engine.subscribe();
    let surface = h.engine.open_surface();

    let submitted = h
        .engine
        .submit(
            Submission::new(CapabilityId::ImageUpscale)
                .with_inputs(vec![image("https://cdn.test/small.png")])
                .on_surface(&surface),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.engine.close_surface(&surface));
    assert!(!h.engine.close_surface(&surface));

    let seen = events_until_terminal(&mut events, &submitted.task.id).await;
    assert!(matches!(seen.last(), Some(EngineEvent::Cancelled(_))));
    assert!(h.graph.is_empty());

    let fetches = h.service.fetch_count(&submitted.task.id);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.service.fetch_count(&submitted.task.id), fetches);
    assert!(h.engine.active_polls().is_empty());
}

#[tokio::test]
async fn test_submit_on_closed_surface_is_rejected() {
    let h = harness(processing_then_done(), 120);
    let surface = h.engine.open_surface();
    h.engine.close_surface(&surface);

    let err = h
        .engine
        .submit(
            Submission::new(CapabilityId::ImageUpscale)
                .with_inputs(vec![image("https://cdn.test/a.png")])
                .on_surface(&surface),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));
    assert_eq!(h.service.submit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_cancel_asks_service() {
    let h = harness(vec![Step::Status("processing", 20)], 120);
    let mut events = h.engine.subscribe();

    let submitted = h
        .engine
        .submit(
            Submission::new(CapabilityId::VideoEnhance).with_inputs(vec![InputReference::hosted(
                MediaType::Video,
                "https://cdn.test/clip.mp4",
            )]),
        )
        .await
        .unwrap();

    assert!(h.engine.cancel(&submitted.task.id));
    let seen = events_until_terminal(&mut events, &submitted.task.id).await;
    assert!(matches!(seen.last(), Some(EngineEvent::Cancelled(_))));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        *h.service.cancelled.lock().unwrap(),
        vec![submitted.task.id.clone()]
    );
    assert!(!h.engine.cancel(&submitted.task.id));
}

#[tokio::test]
async fn test_keyframe_order_matches_input_order() {
    let h = harness(processing_then_done(), 120);
    let inputs = vec![
        local_image("first.png"),
        image("https://cdn.test/second.png"),
        local_image("third.png"),
        image("https://cdn.test/fourth.png"),
    ];

    let submitted = h
        .engine
        .submit(Submission::new(CapabilityId::MultiImageToVideo).with_inputs(inputs.clone()))
        .await
        .unwrap();

    let expected = vec![
        "https://uploads.test/first.png",
        "https://cdn.test/second.png",
        "https://uploads.test/third.png",
        "https://cdn.test/fourth.png",
    ];
    assert_eq!(submitted.request.urls(), expected);

    let sent = h.service.submitted.lock().unwrap()[0].clone();
    let keyframes: Vec<String> = sent["payload"]["keyframes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k["image_url"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(keyframes, expected);
    assert_eq!(submitted.placeholder.payload_snapshot, sent);
    assert_eq!(h.uploader.count(), 2);
}

#[tokio::test]
async fn test_upload_failure_submits_nothing() {
    let h = harness_with(
        ScriptedService::new(processing_then_done()),
        RecordingUploader::failing(),
        120,
    );

    let err = h
        .engine
        .submit(
            Submission::new(CapabilityId::ImageToVideo).with_inputs(vec![local_image("big.png")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Upload(_)));
    assert!(err.to_string().contains("big.png"));
    assert_eq!(h.service.submit_count(), 0);
    assert!(h.graph.is_empty());
}

#[tokio::test]
async fn test_rejected_submission_creates_no_placeholder() {
    let h = harness_with(
        ScriptedService::rejecting("Insufficient credits"),
        RecordingUploader::new(),
        120,
    );

    let err = h
        .engine
        .submit(
            Submission::new(CapabilityId::ImageUpscale)
                .with_inputs(vec![image("https://cdn.test/a.png")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Submit(SubmitError::Rejected(_))));
    assert!(h.graph.is_empty());
    assert!(h.engine.active_polls().is_empty());
}

#[tokio::test]
async fn test_build_error_submits_nothing() {
    let h = harness(processing_then_done(), 120);

    let err = h
        .engine
        .submit(
            Submission::new(CapabilityId::Relight)
                .with_backend(Backend::Comfy)
                .with_inputs(vec![image("https://cdn.test/a.png")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Build(_)));
    assert_eq!(h.service.submit_count(), 0);
}

#[tokio::test]
async fn test_comfy_backend_payload() {
    let h = harness(processing_then_done(), 120);

    let submitted = h
        .engine
        .submit(
            Submission::new(CapabilityId::TextToImage)
                .with_backend(Backend::Comfy)
                .with_prompt("a lighthouse at dusk")
                .with_params(GenerationParams::default().with_seed(7)),
        )
        .await
        .unwrap();

    let snapshot = &submitted.request.payload_snapshot;
    assert_eq!(snapshot["backend"], "comfy");
    assert_eq!(snapshot["payload"]["seed"], 7);
    assert_eq!(snapshot["payload"]["workflow"]["5"]["class_type"], "KSampler");
}

#[tokio::test]
async fn test_presets_follow_capability_selection() {
    let h = harness(processing_then_done(), 120);

    let fresh = h.engine.select_capability(CapabilityId::Relight).unwrap();
    assert!(!fresh.from_preset);
    assert_eq!(fresh.params, GenerationParams::default());
    assert_eq!(fresh.definition.id, CapabilityId::Relight);

    let params = GenerationParams::default().with_extra("lightDirection", "left");
    h.engine
        .update_params(CapabilityId::Relight, &params)
        .unwrap();

    let again = h.engine.select_capability(CapabilityId::Relight).unwrap();
    assert!(again.from_preset);
    assert_eq!(again.params, params);

    let other = h.engine.select_capability(CapabilityId::ImageUpscale).unwrap();
    assert!(!other.from_preset);
}

#[tokio::test]
async fn test_submission_without_params_uses_preset() {
    let h = harness(processing_then_done(), 120);
    h.engine
        .update_params(
            CapabilityId::ImageUpscale,
            &GenerationParams::default().with_extra("scale", 4),
        )
        .unwrap();

    let submitted = h
        .engine
        .submit(
            Submission::new(CapabilityId::ImageUpscale)
                .with_inputs(vec![image("https://cdn.test/a.png")]),
        )
        .await
        .unwrap();
    assert_eq!(submitted.request.payload_snapshot["payload"]["scale"], 4);
}

#[tokio::test]
async fn test_sqlite_presets_survive_restart() {
    let temp = tempdir().unwrap();
    let config = EngineConfig::builder()
        .with_api_endpoint("https://api.test")
        .with_preset_db_path(temp.path().join("presets.db"))
        .build();
    let params = GenerationParams::default().with_duration(12).with_aspect_ratio("9:16");

    {
        let engine = DispatchEngine::builder(config.clone())
            .with_task_service(ScriptedService::new(processing_then_done()))
            .build()
            .unwrap();
        engine.update_params(CapabilityId::TextToVideo, &params).unwrap();
        engine.shutdown().await;
    }

    let engine = DispatchEngine::builder(config)
        .with_task_service(ScriptedService::new(processing_then_done()))
        .build()
        .unwrap();
    let selection = engine.select_capability(CapabilityId::TextToVideo).unwrap();
    assert!(selection.from_preset);
    assert_eq!(selection.params, params);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = EngineConfig::builder().with_max_poll_attempts(0).build();
    let result = DispatchEngine::builder(config).build();
    assert!(matches!(result, Err(DispatchError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_active_polls() {
    let h = harness(vec![Step::Status("processing", 5)], 120);
    let mut events = h.engine.subscribe();

    let submitted = h
        .engine
        .submit(Submission::new(CapabilityId::TextToVideo).with_prompt("storm clouds"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    h.engine.shutdown().await;

    let seen = events_until_terminal(&mut events, &submitted.task.id).await;
    assert!(matches!(seen.last(), Some(EngineEvent::Cancelled(_))));
    assert!(h.graph.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_tasks_settle_independently() {
    let h = harness(processing_then_done(), 120);
    let mut events = h.engine.subscribe();

    let a = h
        .engine
        .submit(Submission::new(CapabilityId::TextToVideo).with_prompt("first"))
        .await
        .unwrap();
    let b = h
        .engine
        .submit(Submission::new(CapabilityId::TextToVideo).with_prompt("second"))
        .await
        .unwrap();
    assert_ne!(a.task.id, b.task.id);
    assert!(h.engine.cancel(&a.task.id));

    let mut terminal = Vec::new();
    while terminal.len() < 2 {
        let event = events.recv().await.unwrap();
        if event.is_terminal() {
            terminal.push(event);
        }
    }
    assert!(terminal
        .iter()
        .any(|e| matches!(e, EngineEvent::Cancelled(c) if c.task_id == a.task.id)));
    assert!(terminal
        .iter()
        .any(|e| matches!(e, EngineEvent::Completed(c) if c.task_id == b.task.id)));
    assert_eq!(h.graph.len(), 1);
}
