pub mod binder;
pub mod error;
/// Stream notifications and the "threads updated" broadcast.
pub mod events;
pub mod hydrator;
/// Message model shared by the transport, the reconciler and the viewport.
pub mod message;
pub mod reconciler;
pub mod scroll_manager;
pub mod sidebar;
pub mod view;
pub mod viewport;

pub use binder::{
    AgentSelection, LAST_SELECTED_AGENT_KEY, NavigationRequest, Route, RouteChange,
    SessionBinder, SessionIdentity, generate_session_id,
};
pub use error::{ChatError, ChatResult, SubmitRejected};
pub use events::{StreamNotification, ThreadsUpdated, ThreadsUpdatedReason, ThreadsUpdatedSignal};
pub use hydrator::{HistoryHydrator, HydrationOutcome, HydrationStart, HydrationTicket, hydrate_records};
pub use message::{
    AgentId, Message, MessageId, Part, Role, SessionId, StreamStatus, reasoning_in_progress,
};
pub use reconciler::{
    DEFAULT_STREAM_DEBOUNCE, FlushReason, FlushState, ReconcileOutcome, StreamReconciler,
};
pub use scroll_manager::{FollowMode, ScrollConfig, ScrollManager};
pub use sidebar::{ThreadAgeGroup, ThreadGroup, ThreadSidebar, group_threads};
pub use view::{ChatDependencies, ChatView, ChatViewConfig};
pub use viewport::{ScrollBehavior, Viewport, ViewportMetrics, VirtualViewport};
