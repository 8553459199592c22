use pricewatch_core::config::DispatchConfig;
use pricewatch_core::dispatcher::Dispatcher;
use pricewatch_core::engine::EngineId;
use pricewatch_core::job::{CreateScrapeJobRequest, FailureReason, JobOutcome, JobStatus};
use pricewatch_core::registry::EngineRegistry;
use pricewatch_core::testutil::MockExecutor;
use pricewatch_db::Database;

use crate::integration::common::{engine_request, setup_test_db};

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn dispatch_and_complete_against_postgres() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let dispatcher = Dispatcher::new(
        db.engine_repo(),
        db.job_repo(),
        MockExecutor::accepting(),
        DispatchConfig::default(),
    );

    let no_engines = dispatcher
        .track_product(CreateScrapeJobRequest::new("https://shop.example/p/0"))
        .await
        .unwrap();
    assert_eq!(no_engines.job.failure_reason, Some(FailureReason::NoCapacity));

    let e1 = db
        .engine_repo()
        .register(engine_request(1).active(true))
        .await
        .unwrap();
    let e2 = db
        .engine_repo()
        .register(engine_request(2).active(true))
        .await
        .unwrap();

    let first = dispatcher
        .track_product(CreateScrapeJobRequest::new("https://shop.example/p/1"))
        .await
        .unwrap();
    let second = dispatcher
        .track_product(CreateScrapeJobRequest::new("https://shop.example/p/2"))
        .await
        .unwrap();

    assert_eq!(first.job.engine_id, Some(e1.id));
    assert_eq!(second.job.engine_id, Some(e2.id));
    assert_eq!(first.job.status, JobStatus::Running);

    let done = dispatcher
        .report_completion(first.job.id, JobOutcome::Succeeded)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);

    let loads: Vec<(EngineId, u32)> = db
        .engine_repo()
        .list()
        .await
        .unwrap()
        .iter()
        .map(|e| (e.id, e.task_count))
        .collect();
    assert_eq!(loads, vec![(e1.id, 0), (e2.id, 1)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a Docker daemon"]
async fn concurrent_dispatch_spreads_load_evenly() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let config = DispatchConfig {
        max_reserve_conflicts: 1,
        ..DispatchConfig::default()
    };
    let dispatcher = Dispatcher::new(
        db.engine_repo(),
        db.job_repo(),
        MockExecutor::accepting(),
        config,
    );
    for n in 1..=3 {
        db.engine_repo()
            .register(engine_request(n).active(true))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..30 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .track_product(CreateScrapeJobRequest::new(format!(
                    "https://shop.example/p/{i}"
                )))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_assigned());
    }

    let loads: Vec<u32> = db
        .engine_repo()
        .list()
        .await
        .unwrap()
        .iter()
        .map(|e| e.task_count)
        .collect();
    assert_eq!(loads, vec![10, 10, 10]);
}
