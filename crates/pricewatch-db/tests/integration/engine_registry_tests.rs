use pricewatch_core::engine::{EngineId, Reservation};
use pricewatch_core::error::AppError;
use pricewatch_core::registry::EngineRegistry;
use pricewatch_db::PgEngineRegistry;

use crate::integration::common::{engine_request, setup_test_db};

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn register_and_list_in_id_order() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool);

    let a = registry.register(engine_request(1)).await.unwrap();
    let b = registry
        .register(engine_request(2).active(true))
        .await
        .unwrap();

    assert!(a.id < b.id);
    assert_eq!(a.task_count, 0);
    assert!(!a.active);
    assert_eq!(a.host.to_string(), "10.0.0.1");
    assert_eq!(a.port, 8001);

    let all = registry.list().await.unwrap();
    assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a.id, b.id]);

    let active = registry.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, b.id);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn duplicate_name_is_validation_error() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool);

    registry.register(engine_request(1)).await.unwrap();
    let err = registry.register(engine_request(1)).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)), "got {err}");
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn try_reserve_compares_observed_load() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool);
    let engine = registry
        .register(engine_request(1).active(true))
        .await
        .unwrap();

    match registry.try_reserve(engine.id, 0).await.unwrap() {
        Reservation::Reserved(e) => assert_eq!(e.task_count, 1),
        other => panic!("expected reservation, got {other:?}"),
    }

    // A second caller that also observed 0 loses.
    match registry.try_reserve(engine.id, 0).await.unwrap() {
        Reservation::Stale(e) => assert_eq!(e.task_count, 1),
        other => panic!("expected stale, got {other:?}"),
    }

    registry.mark_inactive(engine.id).await.unwrap();
    assert!(matches!(
        registry.try_reserve(engine.id, 1).await.unwrap(),
        Reservation::Stale(_)
    ));

    assert!(matches!(
        registry.try_reserve(EngineId(999), 0).await,
        Err(AppError::UnknownEngine(EngineId(999)))
    ));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn decrement_never_goes_negative() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool);
    let engine = registry.register(engine_request(1)).await.unwrap();

    registry.increment_load(engine.id).await.unwrap();
    assert_eq!(registry.decrement_load(engine.id).await.unwrap().task_count, 0);

    let err = registry.decrement_load(engine.id).await.unwrap_err();
    assert!(matches!(err, AppError::LoadUnderflow(_)));
    assert_eq!(
        registry.get(engine.id).await.unwrap().unwrap().task_count,
        0
    );

    assert!(matches!(
        registry.decrement_load(EngineId(42)).await,
        Err(AppError::UnknownEngine(EngineId(42)))
    ));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn concurrent_increments_are_not_lost() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool);
    let engine = registry.register(engine_request(1)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.increment_load(engine.id).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        registry.get(engine.id).await.unwrap().unwrap().task_count,
        50
    );
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn set_active_unknown_engine() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool);

    assert!(matches!(
        registry.set_active(EngineId(7), true).await,
        Err(AppError::UnknownEngine(EngineId(7)))
    ));
}
