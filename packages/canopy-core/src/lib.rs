pub mod error;
pub mod host;
pub mod memory;
pub mod patch;
pub mod reconcile;
pub mod rendering;
pub mod tree;
pub mod widget;

pub use error::{ConsistencyError, ProtocolError, ReconcileError};
pub use host::{EventCallback, EventReceiver, EventSender, HostBinding, HostEvent, event_channel};
pub use memory::{HostMutation, HostNodeId, MemoryHost};
pub use patch::{InsertionSource, ModifyAttributes, ModifyChildren, Patch, ReplaceElement, ReplaceRoot};
pub use reconcile::Reconciler;
pub use rendering::{AttrValue, HandlerRef, NodeId, RenderResult, Rendering, RootRendering};
pub use tree::{Node, NodeKind};
pub use widget::{WidgetCapability, WidgetError, WidgetRegistry};
