//! Logging setup for the server binary.
//!
//! `--log.filter` takes tracing directives rather than a bare level, so
//! operators can quiet chatty layers independently of the server itself,
//! e.g. `ckbd=debug,tower_http=warn`. Output is JSON whenever stderr is not
//! a terminal, which is what log forwarders scrape in deployment.

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Tracing filter directives, e.g. "info" or "ckbd=debug,tower_http=warn".
    #[arg(long = "log.filter", default_value = "info", env = "CKB_LOG", global = true)]
    pub filter: String,

    /// Force JSON log lines even on an interactive terminal.
    #[arg(long = "log.json", action(clap::ArgAction::SetTrue), global = true)]
    pub json: bool,
}

/// Initializes logging, using the given args. Panics if called twice.
pub fn init_logging(args: &LogArgs) {
    // CLOSE span events give one line per completed request span, carrying
    // its duration and recorded fields.
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(args.filter.as_str())
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_target(false);

    if args.json || !atty::is(atty::Stream::Stderr) {
        builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .init();
    } else {
        builder.compact().init();
    }
}
