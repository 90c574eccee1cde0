use slog::Logger;
use sloggers::{Config, LoggerConfig};
use std::sync::OnceLock;

static ROOT_LOGGER: OnceLock<Logger> = OnceLock::new();

/// Builds the process-wide root logger from an inline terminal config and
/// stashes it for [`root`] to hand out. Call once, early in `main`.
pub fn init(level: &str) {
    let toml = format!(
        r#"
type = "terminal"
level = "{}"
destination = "stderr"
"#,
        level
    );

    let config: LoggerConfig = serdeconv::from_toml_str(&toml).expect("invalid logging config");
    let logger = config.build_logger().expect("failed to build logger");

    let _ = ROOT_LOGGER.set(logger);
}

/// Returns the root logger, falling back to a plain debug-level terminal
/// logger if `init` was never called (keeps library code and tests usable
/// without forcing every caller through `init`).
pub fn root() -> &'static Logger {
    ROOT_LOGGER.get_or_init(|| {
        let config: LoggerConfig = serdeconv::from_toml_str(
            r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
        )
        .unwrap();
        config.build_logger().unwrap()
    })
}
