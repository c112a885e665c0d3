//! ---
//! sw_section: "03-logging"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Structured lifecycle logging adapters."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
/// Emit an informational log enriched with harness context.
#[macro_export]
macro_rules! sw_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::INFO,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a debug log enriched with harness context.
#[macro_export]
macro_rules! sw_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::DEBUG,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit a warning log enriched with harness context.
#[macro_export]
macro_rules! sw_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::WARN,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an error log enriched with harness context.
#[macro_export]
macro_rules! sw_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        let ctx = &$crate::LogContext::default();
        tracing::event!(
            tracing::Level::ERROR,
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}
