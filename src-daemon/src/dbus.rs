use zbus::object_server::SignalEmitter;
use zbus::{fdo, interface, proxy};

use crate::orchestrator::CaptureOrchestrator;

pub const BUS_NAME: &str = "io.github.TextExtractor";
pub const OBJECT_PATH: &str = "/io/github/TextExtractor";

pub const REPLY_STARTED: &str = "Started";
pub const REPLY_BUSY: &str = "Busy";

/// Control surface bound to a keyboard shortcut or called by `text-extractor-ctl`.
pub struct TextExtractorService {
    orchestrator: CaptureOrchestrator,
}

impl TextExtractorService {
    pub fn new(orchestrator: CaptureOrchestrator) -> Self {
        Self { orchestrator }
    }
}

#[interface(name = "io.github.TextExtractor")]
impl TextExtractorService {
    /// Start a capture. Replies `Busy` if one is already running.
    async fn extract(&self) -> fdo::Result<String> {
        let reply = match self.orchestrator.trigger() {
            Some(_) => REPLY_STARTED,
            None => REPLY_BUSY,
        };
        Ok(reply.to_string())
    }

    async fn cancel(&self) -> bool {
        self.orchestrator.cancel()
    }

    #[zbus(property(emits_changed_signal = "false"))]
    fn busy(&self) -> bool {
        self.orchestrator.is_busy()
    }

    #[zbus(property(emits_changed_signal = "false"))]
    fn state(&self) -> String {
        self.orchestrator.state().to_string()
    }

    #[zbus(property)]
    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    #[zbus(signal)]
    pub async fn progress_changed(
        emitter: &SignalEmitter<'_>,
        visible: bool,
        message: &str,
    ) -> zbus::Result<()>;
}

/// Client side of [`TextExtractorService`].
#[proxy(
    interface = "io.github.TextExtractor",
    default_service = "io.github.TextExtractor",
    default_path = "/io/github/TextExtractor",
    gen_blocking = false
)]
pub trait TextExtractor {
    fn extract(&self) -> zbus::Result<String>;

    fn cancel(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn busy(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn state(&self) -> zbus::Result<String>;

    #[zbus(property)]
    fn version(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn progress_changed(&self, visible: bool, message: String) -> zbus::Result<()>;
}
