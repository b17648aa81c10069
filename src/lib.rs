//! Framework-independent engine for interactive diagram editors.
//!
//! Owns the authoritative node/edge/viewport model, derives every side
//! effect of an edit through a middleware pipeline, routes edges via
//! pluggable algorithms and emits domain events once a change has settled.
//! Renderers subscribe to state and events and feed actions back in; they
//! never mutate state directly.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod geometry;
pub mod middleware;
pub mod model;
pub mod pipeline;
pub mod routing;

pub use config::{FlowConfig, RoutingConfig, ZOrderConfig};
pub use engine::{FlowEngine, LayoutResult, Transaction};
pub use error::FlowError;
pub use event::{DomainEvent, DomainEventKind, EventManager, SubscriptionId};
pub use geometry::{Bounds, Point, Rect, Size};
pub use model::{
    Edge, EdgeLabel, EdgeUpdate, FlowState, FlowStateUpdate, Metadata, MetadataUpdate, Node,
    NodeUpdate, Port, PortKind, PortSide, PositionOnEdge, RoutingMode, Viewport,
};
pub use pipeline::{ActionType, Middleware, Next, PipelineContext};
pub use routing::{EdgeRouting, EdgeRoutingContext, RoutingManager};
