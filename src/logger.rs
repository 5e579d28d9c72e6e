use std::fmt;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Prefix every diagnostic line carries, so they can be told apart from the
/// admitted records written to stdout.
pub const LOG_PREFIX: &str = "LEVELGATE";

/// Formats events as `LEVELGATE | LEVEL | message`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = event.metadata().level();
        write!(writer, "{LOG_PREFIX} | {level} | ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::util::SubscriberInitExt;

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock poisoned").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_format_event() {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(buffer.clone())
            .event_format(Formatter)
            .finish();

        let guard = subscriber.set_default();
        tracing::warn!("FILTER_STORE | Could not persist filter for log {}", "app1");
        drop(guard);

        let output =
            String::from_utf8(buffer.0.lock().expect("lock poisoned").clone()).expect("utf8");
        assert_eq!(
            output,
            "LEVELGATE | WARN | FILTER_STORE | Could not persist filter for log app1\n"
        );
    }
}
