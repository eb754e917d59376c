use futures::stream::BoxStream;
use sse_stream::{Error as SseError, Sse};

pub type BoxedSseResponse = BoxStream<'static, Result<Sse, SseError>>;
