use customop_rs::{CustomOpEngine, EngineConfig, EngineError, EngineKind};

// Environment is read once per process, so this binary holds a single test.
#[test]
fn global_engine_is_configured_from_the_environment() {
    std::env::set_var("CUSTOMOP_ENGINE_TYPE", "NaiveEngine");
    std::env::set_var("CUSTOMOP_NUM_THREADS", "3");

    let engine = CustomOpEngine::get();
    assert!(engine.is_naive());
    assert_eq!(
        engine.config(),
        EngineConfig {
            kind: EngineKind::Naive,
            max_workers: 3,
        }
    );
    assert!(std::ptr::eq(engine, CustomOpEngine::get()));

    let err = CustomOpEngine::install(CustomOpEngine::new(EngineConfig::pooled(2))).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyInitialized));
}
