use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

/// Dependencies whose per-query / per-connection chatter is held at `warn`
/// unless the operator's filter names them explicitly.
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "hyper_util"];

/// Initialize the tracing subscriber with env-based filtering.
///
/// Reads `RUST_LOG`, then `LOG_LEVEL`, and falls back to `default_level`.
/// Safe to call twice; the second call is a no-op.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = fmt()
        .with_env_filter(quiet_dependencies(filter))
        .with_target(true)
        .try_init();
}

fn quiet_dependencies(mut filter: EnvFilter) -> EnvFilter {
    let rendered = filter.to_string();
    for target in QUIET_TARGETS {
        if rendered.contains(target) {
            continue;
        }
        if let Ok(directive) = format!("{target}=warn").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiets_unnamed_dependencies() {
        let filter = quiet_dependencies(EnvFilter::new("info"));
        let rendered = filter.to_string();
        assert!(rendered.contains("sqlx=warn"), "got: {rendered}");
        assert!(rendered.contains("hyper=warn"), "got: {rendered}");
    }

    #[test]
    fn keeps_explicit_dependency_level() {
        let filter = quiet_dependencies(EnvFilter::new("info,sqlx=debug"));
        let rendered = filter.to_string();
        assert!(rendered.contains("sqlx=debug"), "got: {rendered}");
        assert!(!rendered.contains("sqlx=warn"), "got: {rendered}");
    }
}
