use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the global fmt subscriber.
///
/// `RUST_LOG` takes precedence, then `debug`, then `logging.level`. Calling
/// this more than once keeps the first subscriber.
pub fn init(logging: &LoggingConfig, debug: bool) {
    let directive = if debug { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
    {
        debug!("Tracing subscriber already installed: {}", e);
    }
}

/// Route panics through the log sink before the default hook runs.
///
/// Handler panics inside consumer runners are caught per message; this hook
/// makes them visible in the same place as every other failure.
pub fn install_panic_hook() {
    if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic message".to_string());

        let thread = std::thread::current();

        error!(
            panic.location = %location,
            panic.thread = thread.name().unwrap_or("unnamed"),
            "panic: {}",
            message
        );
        default_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let logging = LoggingConfig::default();
        init(&logging, false);
        assert!(tracing::dispatcher::has_been_set());

        // A second call keeps the installed subscriber instead of panicking
        init(&logging, true);
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn test_panic_hook_installs_once() {
        install_panic_hook();
        install_panic_hook();
        assert!(PANIC_HOOK_INSTALLED.load(Ordering::SeqCst));

        let result = std::panic::catch_unwind(|| panic!("caught in test"));
        assert!(result.is_err());
    }
}
