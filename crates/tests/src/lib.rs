//! # Integration Tests
//!
//! Cross-crate and end-to-end tests.
//!
//! Covers:
//! - Contract snapshot tests
//! - Substrate equivalence (cooperative vs thread pool)
//! - Source -> engine -> sink runs without a process boundary

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ClusterKind, ConfigVersion, SinkType, SourceType};

    #[test]
    fn test_blueprint_defaults_survive_a_toml_round_trip() {
        let content = "[cluster]\nimplementation = \"Threading\"\nsize = 3\n\n\
                       [source]\nsource_type = \"mock\"\n\n\
                       [sink]\nname = \"users\"\nsink_type = \"log\"\n";
        let blueprint = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap();
        assert_eq!(blueprint.version, ConfigVersion::V1);
        assert_eq!(blueprint.cluster.implementation, ClusterKind::ThreadPool);
        assert_eq!(blueprint.cluster.channel_capacity, 16);
        assert_eq!(blueprint.source.page_size, 8000);

        let rendered = ConfigLoader::to_toml(&blueprint).unwrap();
        assert!(rendered.contains("implementation = \"thread_pool\""));

        let reparsed = ConfigLoader::load_from_str(&rendered, ConfigFormat::Toml).unwrap();
        assert_eq!(reparsed.cluster.implementation, ClusterKind::ThreadPool);
        assert_eq!(reparsed.cluster.size, 3);
        assert_eq!(reparsed.cluster.startup_timeout_secs, 30);
        assert_eq!(reparsed.source.source_type, SourceType::Mock);
        assert_eq!(reparsed.sink.sink_type, SinkType::Log);
        assert_eq!(reparsed.sink.name, "users");
    }

    #[test]
    fn test_every_kind_builds_an_engine() {
        for kind in ClusterKind::ALL {
            let mut config = cluster::ClusterConfig::new(kind, 2);
            if kind == ClusterKind::ProcessPool {
                config = config.with_worker_command(cluster::WorkerCommand::new("migrator"));
            }
            let sink = std::sync::Arc::new(cluster::LogSink::new("contract"));
            let engine = cluster::EngineFactory::create(sink, config).unwrap();
            assert_eq!(cluster::DispatchEngine::kind(&engine), kind);
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cluster::{ClusterConfig, ClusterError, DispatchEngine, EngineFactory};
    use contracts::{
        Batch, ClusterKind, ContractError, PageSource, Record, SinkConfig, SinkType,
        SourceConfig, SourceType, Value, WorkExecutor, WorkerId,
    };

    /// Records which worker saw which batch id, in arrival order
    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<(usize, i64)>>,
    }

    impl RecordingExecutor {
        fn seen(&self) -> Vec<(usize, i64)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl WorkExecutor for RecordingExecutor {
        type Connection = WorkerId;

        fn name(&self) -> &str {
            "recording"
        }

        async fn connect(&self, worker: WorkerId) -> Result<WorkerId, ContractError> {
            Ok(worker)
        }

        async fn execute(&self, batch: &Batch, worker: &mut WorkerId) -> Result<(), ContractError> {
            let Some(Value::Int(id)) = batch.records()[0].fields().first().cloned() else {
                return Err(ContractError::invalid_record("batch without id"));
            };
            if id < 0 {
                return Err(ContractError::invalid_record(format!("negative id {id}")));
            }
            // Yield so workers interleave
            tokio::task::yield_now().await;
            self.seen.lock().unwrap().push((worker.index(), id));
            Ok(())
        }

        async fn close(&self, _worker: WorkerId) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn batch(id: i64, records: usize) -> Batch {
        Batch::new(
            (0..records)
                .map(|_| Record::new(vec![Value::Int(id)]))
                .collect(),
        )
    }

    fn config(kind: ClusterKind, size: usize) -> ClusterConfig {
        ClusterConfig::new(kind, size)
            .with_channel_capacity(2)
            .with_startup_timeout(Duration::from_secs(10))
    }

    const IN_PROCESS: [ClusterKind; 2] = [ClusterKind::Cooperative, ClusterKind::ThreadPool];

    /// Every batch reaches exactly one worker, the one round-robin picked
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_substrates_deliver_each_batch_exactly_once() {
        for kind in IN_PROCESS {
            let executor = Arc::new(RecordingExecutor::default());
            let mut engine = EngineFactory::create(Arc::clone(&executor), config(kind, 3)).unwrap();
            engine.initialize().await.unwrap();

            for id in 0..20 {
                let worker = engine.dispatch(batch(id, 2)).await.unwrap();
                assert_eq!(worker, id as usize % 3, "{kind}: batch {id}");
            }

            let summary = engine.await_completion().await.unwrap();
            assert_eq!(summary.batches_dispatched, 20, "{kind}");
            assert_eq!(summary.batches_processed(), 20, "{kind}");
            assert_eq!(summary.records_processed(), 40, "{kind}");
            assert!(summary.failed_workers().is_empty(), "{kind}");

            let seen = executor.seen();
            let mut ids: Vec<i64> = seen.iter().map(|(_, id)| *id).collect();
            ids.sort_unstable();
            assert_eq!(ids, (0..20).collect::<Vec<_>>(), "{kind}: loss or duplication");

            // Each worker handles its batches in dispatch order
            for worker in 0..3 {
                let own: Vec<i64> = seen
                    .iter()
                    .filter(|(w, _)| *w == worker)
                    .map(|(_, id)| *id)
                    .collect();
                let expected: Vec<i64> = (0..20).filter(|id| *id as usize % 3 == worker).collect();
                assert_eq!(own, expected, "{kind}: worker {worker}");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_is_fair_within_one_batch() {
        for kind in IN_PROCESS {
            let executor = Arc::new(RecordingExecutor::default());
            let mut engine = EngineFactory::create(executor, config(kind, 4)).unwrap();
            engine.initialize().await.unwrap();

            for id in 0..10 {
                engine.dispatch(batch(id, 1)).await.unwrap();
            }

            let summary = engine.await_completion().await.unwrap();
            let counts: Vec<u64> = summary.workers.iter().map(|w| w.batches_processed).collect();
            assert_eq!(counts, vec![3, 3, 2, 2], "{kind}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_batches_do_not_stop_a_worker() {
        for kind in IN_PROCESS {
            let executor = Arc::new(RecordingExecutor::default());
            let mut engine = EngineFactory::create(Arc::clone(&executor), config(kind, 2)).unwrap();
            engine.initialize().await.unwrap();

            // Worker 0 gets -1, 2, -3; worker 1 gets 1, -2, 3
            for id in [-1, 1, 2, -2, -3, 3] {
                engine.dispatch(batch(id, 1)).await.unwrap();
            }

            let summary = engine.await_completion().await.unwrap();
            assert_eq!(summary.batches_failed(), 3, "{kind}");
            assert_eq!(summary.batches_processed(), 3, "{kind}");
            assert!(summary.failed_workers().is_empty(), "{kind}");
            assert!(summary.workers[0].last_error.as_deref().unwrap().contains("-3"));
            assert_eq!(executor.seen().len(), 3);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_is_idempotent_and_final() {
        for kind in IN_PROCESS {
            let executor = Arc::new(RecordingExecutor::default());
            let mut engine = EngineFactory::create(executor, config(kind, 2)).unwrap();
            engine.initialize().await.unwrap();

            assert!(matches!(
                engine.dispatch(Batch::sentinel()).await,
                Err(ClusterError::EmptyBatch)
            ));
            engine.dispatch(batch(7, 1)).await.unwrap();

            let first = engine.await_completion().await.unwrap();
            let second = engine.await_completion().await.unwrap();
            assert_eq!(first, second, "{kind}");
            assert!(first.all_terminated(), "{kind}");
            assert_eq!(first.batches_dispatched, 1, "{kind}");

            assert!(matches!(
                engine.dispatch(batch(8, 1)).await,
                Err(ClusterError::AlreadyCompleted { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_dispatch_before_initialize_is_rejected() {
        let executor = Arc::new(RecordingExecutor::default());
        let mut engine =
            EngineFactory::create(executor, config(ClusterKind::Cooperative, 1)).unwrap();

        assert!(matches!(
            engine.dispatch(batch(0, 1)).await,
            Err(ClusterError::NotInitialized { .. })
        ));
    }

    /// Blueprint -> source -> engine -> file sink, as the CLI wires it
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_config_driven_migration() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
[cluster]
implementation = "threading"
size = 2

[source]
source_type = "mock"
page_size = 30
params = {{ count = "100" }}

[sink]
name = "people"
sink_type = "file"
params = {{ dir = "{}" }}
"#,
            dir.path().display()
        );
        let blueprint =
            config_loader::ConfigLoader::load_from_str(&toml, config_loader::ConfigFormat::Toml)
                .unwrap();

        let mut source = ingestion::create_source(&blueprint.source).await.unwrap();
        let sink = Arc::new(cluster::create_sink(&blueprint.sink).unwrap());
        let mut engine =
            EngineFactory::create(sink, ClusterConfig::from_settings(&blueprint.cluster)).unwrap();
        assert_eq!(engine.kind(), ClusterKind::ThreadPool);

        engine.initialize().await.unwrap();
        let mut pages = Vec::new();
        while let Some(page) = source.next_page().await.unwrap() {
            pages.push(page.len());
            engine.dispatch(Batch::new(page)).await.unwrap();
        }
        let summary = engine.await_completion().await.unwrap();

        assert_eq!(pages, vec![30, 30, 30, 10]);
        assert_eq!(summary.records_processed(), 100);

        // Worker 0 got pages 0 and 2, worker 1 got pages 1 and 3
        let lines = |worker: usize| {
            std::fs::read_to_string(dir.path().join(format!("people-worker-{worker}.jsonl")))
                .unwrap()
                .lines()
                .count()
        };
        assert_eq!(lines(0), 60);
        assert_eq!(lines(1), 40);
    }

    #[tokio::test]
    async fn test_unreachable_sink_fails_startup_for_every_substrate() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the sink expects a directory
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let sink_config = SinkConfig {
            name: "people".into(),
            sink_type: SinkType::File,
            params: HashMap::from([(
                "dir".to_string(),
                blocker.join("nested").display().to_string(),
            )]),
        };

        for kind in IN_PROCESS {
            let sink = Arc::new(cluster::create_sink(&sink_config).unwrap());
            let mut engine = EngineFactory::create(sink, config(kind, 2)).unwrap();

            let err = engine.initialize().await.unwrap_err();
            assert!(matches!(err, ClusterError::WorkerStartup { .. }), "{kind}: {err}");

            let summary = engine.await_completion().await.unwrap();
            assert_eq!(summary.failed_workers(), vec![0, 1], "{kind}");
            assert!(summary.all_terminated(), "{kind}");
        }
    }

    #[tokio::test]
    async fn test_jsonl_source_projects_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.jsonl");
        std::fs::write(
            &path,
            "{\"username\":\"ana\",\"age\":30}\n\n{\"username\":\"bo\",\"email\":\"b@x\"}\n",
        )
        .unwrap();

        let source_config = SourceConfig {
            source_type: SourceType::Jsonl,
            page_size: 10,
            params: HashMap::from([
                ("path".to_string(), path.display().to_string()),
                ("columns".to_string(), "username,email,age".to_string()),
            ]),
        };

        let mut source = ingestion::create_source(&source_config).await.unwrap();
        let page = source.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(
            page[1].fields(),
            &[Value::from("bo"), Value::from("b@x"), Value::Null]
        );
        assert!(source.next_page().await.unwrap().is_none());
    }
}
