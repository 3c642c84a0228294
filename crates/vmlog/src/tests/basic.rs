use super::*;

#[test]
fn test_capture_and_format() {
    let logger = Logger::new(LogLevel::Debug);
    let sink = Arc::new(CaptureSink::default());
    assert!(logger.set_sink(sink.clone()));

    logger.dispatch(LogLevel::Info, format_args!("value: {}", 42));
    logger.dispatch(LogLevel::Error, format_args!("hex: {:#x}", 0xdead));

    let lines = sink.lines.lock().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], (LogLevel::Info, "value: 42".into()));
    assert_eq!(lines[1], (LogLevel::Error, "hex: 0xdead".into()));
}

#[test]
fn test_level_filter() {
    let logger = Logger::new(LogLevel::Warning);
    assert!(logger.enabled(LogLevel::Error));
    assert!(logger.enabled(LogLevel::Warning));
    assert!(!logger.enabled(LogLevel::Info));
    assert!(!logger.enabled(LogLevel::Debug));

    logger.set_level(LogLevel::Debug);
    assert!(logger.enabled(LogLevel::Debug));
}

#[test]
fn test_second_sink_rejected() {
    let logger = Logger::new(LogLevel::Info);
    let first = Arc::new(CaptureSink::default());
    let second = Arc::new(CaptureSink::default());
    assert!(logger.set_sink(first));
    assert!(!logger.set_sink(second));
}

#[test]
fn test_dispatch_without_sink_is_noop() {
    let logger = Logger::new(LogLevel::Debug);
    // 未注册 sink：不 panic，直接丢弃
    logger.dispatch(LogLevel::Info, format_args!("dropped"));
}
