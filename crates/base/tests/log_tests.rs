use {
    base::{Level, Logger, LOGGER, log_debug, log_info, log_warn, set_min_level},
    std::sync::{Arc, Mutex},
};

struct Capture(Arc<Mutex<Vec<(Level, String)>>>);

impl Logger for Capture {
    fn log(&self, level: Level, _file: &str, _line: usize, message: &str) {
        self.0.lock().unwrap().push((level, message.to_string()));
    }
}

// Single test: the logger and level filter are process-wide.
#[test]
fn test_macros_route_to_logger_and_respect_min_level() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    LOGGER
        .lock()
        .unwrap()
        .replace(Box::new(Capture(Arc::clone(&lines))));

    log_info!("frame {} upscaled", 3);
    set_min_level(Level::Warn);
    log_debug!("hidden");
    log_info!("hidden too");
    log_warn!("size changed");
    set_min_level(Level::Debug);

    let lines = lines.lock().unwrap();
    assert_eq!(
        *lines,
        vec![
            (Level::Info, "frame 3 upscaled".to_string()),
            (Level::Warn, "size changed".to_string()),
        ]
    );
}
