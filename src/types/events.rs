use std::sync::Arc;
use tokio::sync::broadcast;
pub use callcore::events::*;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Lifecycle
    (state_changed, Arc<StateChanged>),

    // Media
    (remote_track, Arc<RemoteTrackAttached>),

    // Recoverable errors
    (error, Arc<CallErrorEvent>),
}

impl EventBus {
    /// Publishes to a channel; having no subscribers is not an error.
    pub(crate) fn emit<T>(sender: &broadcast::Sender<Arc<T>>, event: T) {
        let _ = sender.send(Arc::new(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
