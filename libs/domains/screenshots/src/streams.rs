//! Stream definitions for the screenshots domain.

use stream_worker::StreamDef;

/// Screenshot jobs stream definition.
///
/// Used by the screenshot-worker to process rendering jobs.
pub struct ScreenshotStream;

impl StreamDef for ScreenshotStream {
    const STREAM_NAME: &'static str = "screenshots:jobs";

    const CONSUMER_GROUP: &'static str = "screenshot_workers";

    const DLQ_STREAM: &'static str = "screenshots:dlq";

    const MAX_LENGTH: i64 = 100_000;
}
