//! Built-in middlewares. Registration order matters: routing needs measured
//! bounds and ports, and event derivation needs the final routed state.

pub mod bounds;
pub mod events;
pub mod routing;
pub mod z_index;

use std::sync::Arc;

use crate::pipeline::Middleware;

pub use bounds::BoundsMiddleware;
pub use events::{EventsMiddleware, InitTracker};
pub use routing::RoutingMiddleware;
pub use z_index::ZIndexMiddleware;

/// The built-in chain, in the order it must run.
pub fn builtin_stack() -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(BoundsMiddleware),
        Arc::new(ZIndexMiddleware),
        Arc::new(RoutingMiddleware),
        Arc::new(EventsMiddleware),
    ]
}
